//! Fleet kernel : coordination d'une flotte d'agents distants.
//!
//! Primitives (ring buffer, fenêtre de latence, registre de connexions),
//! boucles périodiques (dispatch des commandes, surveillance des nodes),
//! adaptateurs MQTT / HTTP et stores en mémoire.

pub mod config;
pub mod connections;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod latency;
pub mod logging;
pub mod models;
pub mod mqtt;
pub mod ring_buffer;
pub mod store;
pub mod tasks;
pub mod transport;

pub use connections::ConnectionRegistry;
pub use dispatch::{CommandDispatcher, DispatchReport};
pub use health::{HealthMonitor, HealthTracker, OfflineTransition};
pub use latency::{LatencySample, LatencyStats, LatencyWindow, QualityTracker};
pub use ring_buffer::RingBuffer;
pub use tasks::PeriodicTask;
pub use transport::Transport;
