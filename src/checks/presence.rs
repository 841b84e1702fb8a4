use crate::checks::{CheckError, CheckSuspendResult, StandbyCheck};
use crate::config::{ResourceTypeFilter, Settings};
use crate::provider::ProviderError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use sysinfo::{ProcessExt, System, SystemExt};
use tokio::sync::watch;
use tracing::{debug, warn};

#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, address: IpAddr) -> Result<bool, ProviderError>;
}

/// Sends one echo request through the system `ping` binary, which carries
/// the raw-socket privileges the daemon itself does not have.
pub struct SystemPinger {
    timeout: Duration,
}

impl SystemPinger {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, address: IpAddr) -> Result<bool, ProviderError> {
        let mut command = tokio::process::Command::new("ping");
        #[cfg(target_os = "windows")]
        {
            let timeout_ms = self.timeout.as_millis().to_string();
            command.args(["-n", "1", "-w", timeout_ms.as_str()]);
        }
        #[cfg(not(target_os = "windows"))]
        {
            let timeout_secs = self.timeout.as_secs().max(1).to_string();
            command.args(["-c", "1", "-W", timeout_secs.as_str()]);
        }
        command.arg(address.to_string());

        let output = command
            .output()
            .await
            .map_err(|source| ProviderError::Io {
                what: "ping".to_string(),
                source,
            })?;
        Ok(output.status.success())
    }
}

pub struct NetworkMachinesCheck {
    pinger: Box<dyn Pinger>,
}

impl NetworkMachinesCheck {
    pub fn new(pinger: Box<dyn Pinger>) -> Self {
        Self { pinger }
    }
}

#[async_trait]
impl StandbyCheck for NetworkMachinesCheck {
    fn name(&self) -> &'static str {
        "network-machines"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if !settings.enable_check_network_machines {
            return Ok(CheckSuspendResult::permit());
        }

        for machine in &settings.network_machines_to_monitor {
            if *cancel.borrow() {
                return Err(CheckError::Cancelled);
            }

            let addresses: Vec<IpAddr> = match &machine.ip_address {
                Some(ip) => match ip.parse() {
                    Ok(address) => vec![address],
                    Err(err) => {
                        warn!(machine = %machine.name, error = %err, "invalid ip address, skipping");
                        continue;
                    }
                },
                None => match tokio::net::lookup_host((machine.name.as_str(), 0)).await {
                    Ok(resolved) => resolved.map(|addr| addr.ip()).collect(),
                    Err(err) => {
                        debug!(machine = %machine.name, error = %err, "hostname resolution failed, skipping");
                        continue;
                    }
                },
            };

            for address in addresses {
                match self.pinger.ping(address).await {
                    Ok(true) => {
                        return Ok(CheckSuspendResult::suspend(format!(
                            "Network machine '{}' ({address}) answered ping",
                            machine.name
                        )));
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(machine = %machine.name, address = %address, error = %err, "ping probe failed");
                    }
                }
            }
        }

        Ok(CheckSuspendResult::permit())
    }
}

pub trait ProcessProbe: Send {
    fn running_processes(&mut self) -> Result<Vec<String>, ProviderError>;
}

/// Process probe over sysinfo. Owns its own `System` so the process table
/// refresh never interferes with the counter provider's cadence.
pub struct SysinfoProcessProbe {
    system: System,
}

impl SysinfoProcessProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProcessProbe {
    fn running_processes(&mut self) -> Result<Vec<String>, ProviderError> {
        self.system.refresh_processes();
        Ok(self
            .system
            .processes()
            .values()
            .map(|process| process.name().to_string())
            .collect())
    }
}

pub struct ProcessesCheck {
    probe: Box<dyn ProcessProbe>,
}

impl ProcessesCheck {
    pub fn new(probe: Box<dyn ProcessProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl StandbyCheck for ProcessesCheck {
    fn name(&self) -> &'static str {
        "processes"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        _cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if !settings.enable_check_processes || settings.processes_to_monitor.is_empty() {
            return Ok(CheckSuspendResult::permit());
        }

        let running = match self.probe.running_processes() {
            Ok(processes) => processes,
            Err(err) => {
                warn!(check = self.name(), error = %err, "could not read the process list");
                return Ok(CheckSuspendResult::permit());
            }
        };

        for monitored in &settings.processes_to_monitor {
            if running
                .iter()
                .any(|process| process.eq_ignore_ascii_case(&monitored.process_name))
            {
                return Ok(CheckSuspendResult::suspend(format!(
                    "Process '{}' is running",
                    monitored.process_name
                )));
            }
        }

        Ok(CheckSuspendResult::permit())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenShareResource {
    pub path: String,
    pub directory: bool,
}

#[async_trait]
pub trait ShareProbe: Send {
    async fn open_resources(&mut self) -> Result<Vec<OpenShareResource>, ProviderError>;
}

/// Lists files currently open over SMB shares by parsing `smbstatus -L`
/// output, tolerant of formatting differences between Samba versions.
pub struct SmbstatusProbe;

#[async_trait]
impl ShareProbe for SmbstatusProbe {
    async fn open_resources(&mut self) -> Result<Vec<OpenShareResource>, ProviderError> {
        let output = tokio::process::Command::new("smbstatus")
            .arg("-L")
            .output()
            .await
            .map_err(|source| ProviderError::Io {
                what: "smbstatus".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProviderError::Probe(format!(
                "smbstatus exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_smbstatus_locked_files(&text))
    }
}

/// Locked-files table rows start with a numeric pid; the share root shows up
/// with name ".". Everything that does not look like a row is skipped.
fn parse_smbstatus_locked_files(text: &str) -> Vec<OpenShareResource> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 {
                return None;
            }
            parts[0].parse::<u32>().ok()?;
            let share_path = parts[6];
            let name = parts[7];
            let directory = name == ".";
            let path = if directory {
                share_path.to_string()
            } else {
                format!("{share_path}/{name}")
            };
            Some(OpenShareResource { path, directory })
        })
        .collect()
}

pub struct NetworkResourcesCheck {
    probe: Box<dyn ShareProbe>,
}

impl NetworkResourcesCheck {
    pub fn new(probe: Box<dyn ShareProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl StandbyCheck for NetworkResourcesCheck {
    fn name(&self) -> &'static str {
        "network-resources"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        _cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if !settings.enable_check_network_resources {
            return Ok(CheckSuspendResult::permit());
        }

        let resources = match self.probe.open_resources().await {
            Ok(resources) => resources,
            Err(err) => {
                warn!(check = self.name(), error = %err, "could not list open share resources");
                return Ok(CheckSuspendResult::permit());
            }
        };

        let first_match = resources.into_iter().find(|resource| {
            match settings.network_resource_types {
                ResourceTypeFilter::Files => !resource.directory,
                ResourceTypeFilter::Directories => resource.directory,
                ResourceTypeFilter::All => true,
            }
        });

        match first_match {
            Some(resource) => Ok(CheckSuspendResult::suspend(format!(
                "Network share resource '{}' is open",
                resource.path
            ))),
            None => Ok(CheckSuspendResult::permit()),
        }
    }
}
