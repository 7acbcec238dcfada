use crate::error::ConfigError;
use crate::store::QueuePolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

pub const CONFIG_ENV: &str = "FLEET_KERNEL_CONFIG";

/// Seuil d'inactivité maximal accepté (30 jours)
pub const MAX_OFFLINE_THRESHOLD_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub dispatch: DispatchConf,
    pub health: HealthConf,
    pub windows: WindowsConf,
    pub commands: CommandsConf,
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub data_dir: PathBuf,
    pub log_level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConf {
    pub interval_ms: u64,
    pub batch_size: usize,
    pub send_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConf {
    pub scan_interval_secs: u64,
    pub offline_threshold_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WindowsConf {
    pub latency_capacity: usize,
}

/// Politique de la file de commandes (0 = pas de limite)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CommandsConf {
    pub max_attempts: u32,
    pub max_queued_age_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: SocketAddr,
}

impl Default for DispatchConf {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            batch_size: 50,
            send_timeout_ms: 5000,
        }
    }
}

impl Default for HealthConf {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            offline_threshold_secs: 120,
        }
    }
}

impl Default for WindowsConf {
    fn default() -> Self {
        Self {
            latency_capacity: 120,
        }
    }
}

impl Default for CommandsConf {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_queued_age_secs: 3600,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fleet-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConf::default(),
            health: HealthConf::default(),
            windows: WindowsConf::default(),
            commands: CommandsConf::default(),
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".into(),
        }
    }
}

impl CommandsConf {
    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            max_queued_age: (self.max_queued_age_secs > 0)
                .then(|| time::Duration::seconds(i64::try_from(self.max_queued_age_secs).unwrap_or(i64::MAX))),
        }
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str, origin: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Refuse les valeurs qui rendraient une boucle inerte ou une fenêtre vide
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 6] = [
            ("dispatch.interval_ms", self.dispatch.interval_ms > 0),
            ("dispatch.batch_size", self.dispatch.batch_size > 0),
            ("dispatch.send_timeout_ms", self.dispatch.send_timeout_ms > 0),
            ("health.scan_interval_secs", self.health.scan_interval_secs > 0),
            ("health.offline_threshold_secs", self.health.offline_threshold_secs > 0),
            ("windows.latency_capacity", self.windows.latency_capacity > 0),
        ];
        for (key, ok) in checks {
            if !ok {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.health.offline_threshold_secs > MAX_OFFLINE_THRESHOLD_SECS {
            return Err(ConfigError::Invalid {
                key: "health.offline_threshold_secs",
                reason: format!("must be at most {MAX_OFFLINE_THRESHOLD_SECS}"),
            });
        }
        Ok(())
    }

    pub fn nodes_file(&self) -> PathBuf {
        self.data_dir.join("nodes.json")
    }
}

/// Charge la config depuis `$FLEET_KERNEL_CONFIG` (défaut `kernel.yaml`).
/// Fichier absent = config par défaut ; fichier invalide = erreur.
pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> Result<KernelConfig, ConfigError> {
    let origin = path.display().to_string();
    if !path.exists() {
        warn!(path = %origin, "no config file, using defaults");
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: origin.clone(),
        source,
    })?;
    KernelConfig::from_yaml(&txt, &origin)
}
