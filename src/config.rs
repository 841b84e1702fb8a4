use crate::logsink::Verbosity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Sentinel target name meaning "every volume" or "every network interface".
pub const ALL_TARGETS: &str = "all";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub listen: String,
    pub monitor_interval_secs: u64,
    #[serde(default = "default_probe_count")]
    pub sample_probe_count: u32,
    #[serde(default = "default_probe_interval_ms")]
    pub sample_probe_interval_ms: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub log_verbosity: Verbosity,
    #[serde(default)]
    pub enable_check_cpu_load: bool,
    #[serde(default)]
    pub cpu_load: f32,
    #[serde(default)]
    pub enable_check_memory_load: bool,
    #[serde(default)]
    pub memory_load: f32,
    #[serde(default)]
    pub hdds_to_monitor: Vec<HddToMonitor>,
    #[serde(default)]
    pub network_interfaces_to_monitor: Vec<NetworkInterfaceToMonitor>,
    #[serde(default)]
    pub enable_check_network_machines: bool,
    #[serde(default)]
    pub network_machines_to_monitor: Vec<NetworkMachine>,
    #[serde(default)]
    pub enable_check_processes: bool,
    #[serde(default)]
    pub processes_to_monitor: Vec<ProcessToMonitor>,
    #[serde(default)]
    pub enable_check_network_resources: bool,
    #[serde(default)]
    pub network_resource_types: ResourceTypeFilter,
    #[serde(default)]
    pub uptime_schedulers: Vec<UptimeScheduler>,
    #[serde(default = "default_plugin_settings_dir")]
    pub plugin_settings_dir: PathBuf,
}

/// Disk-throughput policy for one volume (or `all`). The threshold is stored
/// in KB/s; the conversion to the bytes/s the sampler reports happens in the
/// check.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HddToMonitor {
    pub drive: String,
    #[serde(default)]
    pub enable_check_hdd_load: bool,
    #[serde(default)]
    pub hdd_load: f32,
}

/// Network-throughput policy for one interface (or `all`). Thresholds are
/// stored in kbit/s, one per direction plus a combined total.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkInterfaceToMonitor {
    pub network_interface: String,
    #[serde(default)]
    pub enable_check_network_load_total: bool,
    #[serde(default)]
    pub network_load_total: f32,
    #[serde(default)]
    pub enable_check_network_load_download: bool,
    #[serde(default)]
    pub network_load_download: f32,
    #[serde(default)]
    pub enable_check_network_load_upload: bool,
    #[serde(default)]
    pub network_load_upload: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkMachine {
    pub name: String,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessToMonitor {
    pub process_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTypeFilter {
    Files,
    Directories,
    #[default]
    All,
}

/// One recurring keep-awake window. The scheduling collaborator recomputes
/// `next_due_time`/`next_due_time_with_duration` whenever settings change or
/// a due time elapses; the engine only reads them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UptimeScheduler {
    #[serde(default)]
    pub enable_uptime_scheduler: bool,
    #[serde(default)]
    pub next_due_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_due_time_with_duration: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Validation(String),
}

/// Settings persistence collaborator. The engine reads the settings once per
/// monitoring cycle and never writes them back.
pub trait SettingsStore: Send {
    fn load(&self) -> Result<Settings, ConfigError>;
}

pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        Settings::load_from_file(&self.path)
    }
}

impl Settings {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let settings: Settings =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_display,
                source,
            })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.monitor_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "monitor_interval_secs must be >= 1".to_string(),
            ));
        }
        if self.sample_probe_count < 1 {
            return Err(ConfigError::Validation(
                "sample_probe_count must be >= 1".to_string(),
            ));
        }
        if self.sample_probe_interval_ms < 1 {
            return Err(ConfigError::Validation(
                "sample_probe_interval_ms must be >= 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.cpu_load) {
            return Err(ConfigError::Validation(
                "cpu_load must be in the range 0..100".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_load) {
            return Err(ConfigError::Validation(
                "memory_load must be in the range 0..100".to_string(),
            ));
        }

        validate_hdds(&self.hdds_to_monitor)?;
        validate_network_interfaces(&self.network_interfaces_to_monitor)?;
        validate_network_machines(&self.network_machines_to_monitor)?;
        validate_processes(&self.processes_to_monitor)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_hdds(hdds: &[HddToMonitor]) -> Result<(), ConfigError> {
    let mut drives = HashSet::new();
    for hdd in hdds {
        if hdd.drive.trim().is_empty() {
            return Err(ConfigError::Validation(
                "hdds_to_monitor[*].drive must not be empty".to_string(),
            ));
        }
        if !drives.insert(hdd.drive.clone()) {
            return Err(ConfigError::Validation(format!(
                "drive '{}' is monitored more than once",
                hdd.drive
            )));
        }
        if hdd.hdd_load < 0.0 {
            return Err(ConfigError::Validation(format!(
                "hdds_to_monitor '{}' hdd_load must be >= 0",
                hdd.drive
            )));
        }
    }
    Ok(())
}

fn validate_network_interfaces(nics: &[NetworkInterfaceToMonitor]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for nic in nics {
        if nic.network_interface.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network_interfaces_to_monitor[*].network_interface must not be empty".to_string(),
            ));
        }
        if !names.insert(nic.network_interface.clone()) {
            return Err(ConfigError::Validation(format!(
                "network interface '{}' is monitored more than once",
                nic.network_interface
            )));
        }
        for (label, value) in [
            ("network_load_total", nic.network_load_total),
            ("network_load_download", nic.network_load_download),
            ("network_load_upload", nic.network_load_upload),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "network interface '{}' {label} must be >= 0",
                    nic.network_interface
                )));
            }
        }
    }
    Ok(())
}

fn validate_network_machines(machines: &[NetworkMachine]) -> Result<(), ConfigError> {
    for machine in machines {
        if machine.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network_machines_to_monitor[*].name must not be empty".to_string(),
            ));
        }
        if let Some(ip) = &machine.ip_address {
            if ip.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "network machine '{}' has an invalid ip_address '{}'",
                    machine.name, ip
                )));
            }
        }
    }
    Ok(())
}

fn validate_processes(processes: &[ProcessToMonitor]) -> Result<(), ConfigError> {
    for process in processes {
        if process.process_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "processes_to_monitor[*].process_name must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

const fn default_probe_count() -> u32 {
    5
}

const fn default_probe_interval_ms() -> u64 {
    500
}

fn default_plugin_settings_dir() -> PathBuf {
    PathBuf::from("./plugin-settings")
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        listen: "127.0.0.1:9611".to_string(),
        monitor_interval_secs: 60,
        sample_probe_count: 5,
        sample_probe_interval_ms: 500,
        log_file: None,
        log_verbosity: Verbosity::Normal,
        enable_check_cpu_load: false,
        cpu_load: 0.0,
        enable_check_memory_load: false,
        memory_load: 0.0,
        hdds_to_monitor: vec![],
        network_interfaces_to_monitor: vec![],
        enable_check_network_machines: false,
        network_machines_to_monitor: vec![],
        enable_check_processes: false,
        processes_to_monitor: vec![],
        enable_check_network_resources: false,
        network_resource_types: ResourceTypeFilter::All,
        uptime_schedulers: vec![],
        plugin_settings_dir: PathBuf::from("./plugin-settings"),
    }
}
