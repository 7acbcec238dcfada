/*!
# Fleet DevKit - Doublures et utilitaires de test pour le kernel

Bibliothèque facilitant les tests du kernel sans broker MQTT ni agents réels :
- Transport simulé (enregistre les envois, pannes et latence par connexion)
- Constructeurs de messages agents (registration, heartbeat, response...)
- Harness câblant registre, stores, hub, dispatcher et monitor
*/

pub mod agent_messages;
pub mod test_utils;
pub mod transport_stub;

pub use agent_messages::AgentMessageBuilder;
pub use test_utils::TestHarness;
pub use transport_stub::{MockTransport, SentCommand};
