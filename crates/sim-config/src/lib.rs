//! Simulation configuration: the `qnsim.toml` file format and the validated
//! [`SimConfig`] every timeline is constructed from.
//!
//! Configuration errors fail here, before any timeline or worker group is
//! built. Parallel-only constraints (a positive lookahead) are checked by
//! [`SimConfig::validate_parallel`] so a sequential run can leave the field
//! unset.

use anyhow::Context as _;
use serde::Deserialize;
use sim_events::{SimTime, TIME_INFINITY};
use sim_quantum::Formalism;
use std::{fs, path::PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown quantum state formalism {0:?}")]
    UnknownFormalism(String),
    #[error("lookahead must be a positive number of picoseconds for parallel execution")]
    NonPositiveLookahead,
    #[error("quantum manager endpoint needs both qm_ip and qm_port (or neither)")]
    PartialEndpoint,
}

/// On-disk form. Unknown fields are ignored so the file can grow.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub quantum: QuantumSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationSection {
    /// Conservative window width in ps. Required (non-zero) for parallel
    /// runs; a sequential run never reads it.
    #[serde(default)]
    pub lookahead: u64,
    /// Stop time in ps; absent means run until the event pool drains.
    #[serde(default)]
    pub stop_time: Option<u64>,
    #[serde(default)]
    pub show_progress: bool,
    #[serde(default)]
    pub seed: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            lookahead: 0,
            stop_time: None,
            show_progress: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuantumSection {
    #[serde(default = "QuantumSection::default_formalism")]
    pub formalism: String,
    #[serde(default)]
    pub qm_ip: Option<String>,
    #[serde(default)]
    pub qm_port: Option<u16>,
}

impl Default for QuantumSection {
    fn default() -> Self {
        Self {
            formalism: Self::default_formalism(),
            qm_ip: None,
            qm_port: None,
        }
    }
}

impl QuantumSection {
    fn default_formalism() -> String {
        "KET".to_owned()
    }
}

/// Validated configuration handed to timeline constructors.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub lookahead: SimTime,
    pub stop_time: SimTime,
    pub formalism: Formalism,
    pub qm_ip: Option<String>,
    pub qm_port: Option<u16>,
    pub show_progress: bool,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lookahead: 0,
            stop_time: TIME_INFINITY,
            formalism: Formalism::default(),
            qm_ip: None,
            qm_port: None,
            show_progress: false,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let formalism = Formalism::from_tag(&file.quantum.formalism)
            .ok_or_else(|| ConfigError::UnknownFormalism(file.quantum.formalism.clone()))?;
        if file.quantum.qm_ip.is_some() != file.quantum.qm_port.is_some() {
            return Err(ConfigError::PartialEndpoint);
        }
        Ok(Self {
            lookahead: file.simulation.lookahead,
            stop_time: file.simulation.stop_time.unwrap_or(TIME_INFINITY),
            formalism,
            qm_ip: file.quantum.qm_ip,
            qm_port: file.quantum.qm_port,
            show_progress: file.simulation.show_progress,
            seed: file.simulation.seed,
        })
    }

    /// Extra constraints a parallel run adds on top of [`from_file`].
    pub fn validate_parallel(&self) -> Result<(), ConfigError> {
        if self.lookahead == 0 {
            return Err(ConfigError::NonPositiveLookahead);
        }
        Ok(())
    }

    /// The quantum-manager endpoint, when one is configured.
    pub fn qm_endpoint(&self) -> Option<(&str, u16)> {
        match (&self.qm_ip, self.qm_port) {
            (Some(ip), Some(port)) => Some((ip.as_str(), port)),
            _ => None,
        }
    }
}

/// Best-effort config path: a local `qnsim.toml` wins, then the platform
/// config directory.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("qnsim.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("qnsim").join("qnsim.toml");
    }
    PathBuf::from("qnsim.toml")
}

/// Load and validate a configuration. A missing file yields the defaults; a
/// malformed or invalid file is an error, since silently defaulted
/// experiment parameters corrupt results.
pub fn load_from(path: Option<PathBuf>) -> anyhow::Result<SimConfig> {
    let path = path.unwrap_or_else(discover);
    let file = match fs::read_to_string(&path) {
        Ok(content) => {
            info!(target: "config", path = %path.display(), "loading configuration");
            toml::from_str::<ConfigFile>(&content)
                .with_context(|| format!("malformed config file {}", path.display()))?
        }
        Err(_) => {
            info!(target: "config", path = %path.display(), "no config file, using defaults");
            ConfigFile::default()
        }
    };
    let config = SimConfig::from_file(file)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qnsim.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(Some(dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.stop_time, TIME_INFINITY);
        assert_eq!(config.formalism, Formalism::Ket);
        assert!(config.qm_endpoint().is_none());
        assert!(!config.show_progress);
    }

    #[test]
    fn parses_full_file() {
        let (_dir, path) = write_config(
            r#"
            [simulation]
            lookahead = 500
            stop_time = 2000
            show_progress = true
            seed = 7

            [quantum]
            formalism = "DENSITY"
            qm_ip = "10.0.0.5"
            qm_port = 6789
            "#,
        );
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.lookahead, 500);
        assert_eq!(config.stop_time, 2000);
        assert_eq!(config.formalism, Formalism::Density);
        assert_eq!(config.qm_endpoint(), Some(("10.0.0.5", 6789)));
        assert_eq!(config.seed, 7);
        assert!(config.show_progress);
        config.validate_parallel().unwrap();
    }

    #[test]
    fn rejects_unknown_formalism() {
        let (_dir, path) = write_config("[quantum]\nformalism = \"STABILIZER\"\n");
        let err = load_from(Some(path)).unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::UnknownFormalism(tag) if tag == "STABILIZER"));
    }

    #[test]
    fn rejects_partial_endpoint() {
        let (_dir, path) = write_config("[quantum]\nqm_ip = \"127.0.0.1\"\n");
        let err = load_from(Some(path)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::PartialEndpoint)
        ));
    }

    #[test]
    fn zero_lookahead_fails_parallel_validation() {
        let config = SimConfig::default();
        assert!(matches!(
            config.validate_parallel(),
            Err(ConfigError::NonPositiveLookahead)
        ));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let (_dir, path) = write_config("simulation = \"not a table\"");
        assert!(load_from(Some(path)).is_err());
    }
}
