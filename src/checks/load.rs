use crate::checks::{CheckError, CheckSuspendResult, StandbyCheck};
use crate::config::{Settings, ALL_TARGETS};
use crate::provider::{CounterId, TargetKind};
use crate::sampler::{MetricSampler, SampleError, SharedProvider};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Strict comparison shared by all load policies: the check trips on
/// `average > threshold`, never on equality.
fn percent_threshold_result(metric: &str, threshold: f32, average: f64) -> CheckSuspendResult {
    if average > f64::from(threshold) {
        CheckSuspendResult::suspend(format!(
            "{metric} load greater than {threshold}% (average: {}%)",
            average.round()
        ))
    } else {
        CheckSuspendResult::permit()
    }
}

fn kilobytes_to_bytes(kilobytes: f32) -> f64 {
    f64::from(kilobytes) * 1024.0
}

fn bytes_to_kilobytes(bytes: f64) -> f64 {
    bytes / 1024.0
}

fn kilobits_to_bytes(kilobits: f32) -> f64 {
    f64::from(kilobits) * 1000.0 / 8.0
}

fn bytes_to_kilobits(bytes: f64) -> f64 {
    bytes * 8.0 / 1000.0
}

/// A broken counter must never itself be read as "suppress standby": any
/// sampling failure except cancellation turns into an abstention.
fn sample_or_abstain(
    check: &'static str,
    result: Result<f64, SampleError>,
) -> Result<Option<f64>, CheckError> {
    match result {
        Ok(average) => Ok(Some(average)),
        Err(SampleError::Cancelled) => Err(CheckError::Cancelled),
        Err(err) => {
            warn!(check, error = %err, "could not determine load, check abstains");
            Ok(None)
        }
    }
}

pub struct CpuLoadCheck {
    sampler: MetricSampler,
}

impl CpuLoadCheck {
    pub fn new(sampler: MetricSampler) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl StandbyCheck for CpuLoadCheck {
    fn name(&self) -> &'static str {
        "cpu-load"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if !settings.enable_check_cpu_load || settings.cpu_load <= 0.0 {
            return Ok(CheckSuspendResult::permit());
        }

        let sampled = self.sampler.sample(&CounterId::CpuLoad, cancel).await;
        let Some(average) = sample_or_abstain(self.name(), sampled)? else {
            return Ok(CheckSuspendResult::permit());
        };
        Ok(percent_threshold_result("CPU", settings.cpu_load, average))
    }
}

pub struct MemoryLoadCheck {
    sampler: MetricSampler,
}

impl MemoryLoadCheck {
    pub fn new(sampler: MetricSampler) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl StandbyCheck for MemoryLoadCheck {
    fn name(&self) -> &'static str {
        "memory-load"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if !settings.enable_check_memory_load || settings.memory_load <= 0.0 {
            return Ok(CheckSuspendResult::permit());
        }

        let sampled = self.sampler.sample(&CounterId::MemoryLoad, cancel).await;
        let Some(average) = sample_or_abstain(self.name(), sampled)? else {
            return Ok(CheckSuspendResult::permit());
        };
        Ok(percent_threshold_result(
            "Memory",
            settings.memory_load,
            average,
        ))
    }
}

pub struct HddLoadCheck {
    provider: SharedProvider,
    sampler: MetricSampler,
}

impl HddLoadCheck {
    pub fn new(provider: SharedProvider, sampler: MetricSampler) -> Self {
        Self { provider, sampler }
    }

    fn present_volumes(&self) -> Option<Vec<String>> {
        let mut provider = match self.provider.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match provider.list_targets(TargetKind::Volume) {
            Ok(volumes) => Some(volumes),
            Err(err) => {
                warn!(check = "hdd-load", error = %err, "could not enumerate volumes");
                None
            }
        }
    }
}

#[async_trait]
impl StandbyCheck for HddLoadCheck {
    fn name(&self) -> &'static str {
        "hdd-load"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        let monitored: Vec<_> = settings
            .hdds_to_monitor
            .iter()
            .filter(|hdd| hdd.enable_check_hdd_load && hdd.hdd_load > 0.0)
            .collect();
        if monitored.is_empty() {
            return Ok(CheckSuspendResult::permit());
        }

        let Some(volumes) = self.present_volumes() else {
            return Ok(CheckSuspendResult::permit());
        };

        for hdd in monitored {
            let threshold_bytes = kilobytes_to_bytes(hdd.hdd_load);

            if hdd.drive == ALL_TARGETS {
                let counters: Vec<CounterId> = volumes
                    .iter()
                    .map(|volume| CounterId::DiskBytesPerSec(volume.clone()))
                    .collect();
                let sampled = self.sampler.sample_sum(&counters, cancel).await;
                let Some(average) = sample_or_abstain(self.name(), sampled)? else {
                    continue;
                };
                if average > threshold_bytes {
                    return Ok(CheckSuspendResult::suspend(format!(
                        "Disk load on all volumes greater than {} KB/s (average: {} KB/s)",
                        hdd.hdd_load,
                        bytes_to_kilobytes(average).round()
                    )));
                }
                continue;
            }

            // A configured volume that is currently absent (ejected,
            // removable) is skipped, not an error.
            if !volumes.iter().any(|volume| volume == &hdd.drive) {
                debug!(drive = %hdd.drive, "monitored volume is not present, skipping");
                continue;
            }

            let counter = CounterId::DiskBytesPerSec(hdd.drive.clone());
            let sampled = self.sampler.sample(&counter, cancel).await;
            let Some(average) = sample_or_abstain(self.name(), sampled)? else {
                continue;
            };
            if average > threshold_bytes {
                return Ok(CheckSuspendResult::suspend(format!(
                    "Disk load on volume '{}' greater than {} KB/s (average: {} KB/s)",
                    hdd.drive,
                    hdd.hdd_load,
                    bytes_to_kilobytes(average).round()
                )));
            }
        }

        Ok(CheckSuspendResult::permit())
    }
}

pub struct NetworkLoadCheck {
    provider: SharedProvider,
    sampler: MetricSampler,
}

impl NetworkLoadCheck {
    pub fn new(provider: SharedProvider, sampler: MetricSampler) -> Self {
        Self { provider, sampler }
    }

    fn present_interfaces(&self) -> Option<Vec<String>> {
        let mut provider = match self.provider.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match provider.list_targets(TargetKind::NetworkInterface) {
            Ok(interfaces) => Some(interfaces),
            Err(err) => {
                warn!(check = "network-load", error = %err, "could not enumerate network interfaces");
                None
            }
        }
    }
}

#[async_trait]
impl StandbyCheck for NetworkLoadCheck {
    fn name(&self) -> &'static str {
        "network-load"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        if settings.network_interfaces_to_monitor.is_empty() {
            return Ok(CheckSuspendResult::permit());
        }

        for nic in &settings.network_interfaces_to_monitor {
            let targets: Vec<String> = if nic.network_interface == ALL_TARGETS {
                match self.present_interfaces() {
                    Some(interfaces) => interfaces,
                    None => continue,
                }
            } else {
                vec![nic.network_interface.clone()]
            };
            let label = if nic.network_interface == ALL_TARGETS {
                "all network interfaces".to_string()
            } else {
                format!("interface '{}'", nic.network_interface)
            };

            // Direction order is fixed: total, then download, then upload.
            // The first direction over its threshold decides for the cycle.
            if nic.enable_check_network_load_total && nic.network_load_total > 0.0 {
                let counters: Vec<CounterId> = targets
                    .iter()
                    .flat_map(|target| {
                        [
                            CounterId::NetReceivedBytesPerSec(target.clone()),
                            CounterId::NetSentBytesPerSec(target.clone()),
                        ]
                    })
                    .collect();
                let sampled = self.sampler.sample_sum(&counters, cancel).await;
                if let Some(average) = sample_or_abstain(self.name(), sampled)? {
                    if average > kilobits_to_bytes(nic.network_load_total) {
                        return Ok(CheckSuspendResult::suspend(format!(
                            "Network load (total) on {label} greater than {} kbit/s (average: {} kbit/s)",
                            nic.network_load_total,
                            bytes_to_kilobits(average).round()
                        )));
                    }
                }
            }

            if nic.enable_check_network_load_download && nic.network_load_download > 0.0 {
                let counters: Vec<CounterId> = targets
                    .iter()
                    .map(|target| CounterId::NetReceivedBytesPerSec(target.clone()))
                    .collect();
                let sampled = self.sampler.sample_sum(&counters, cancel).await;
                if let Some(average) = sample_or_abstain(self.name(), sampled)? {
                    if average > kilobits_to_bytes(nic.network_load_download) {
                        return Ok(CheckSuspendResult::suspend(format!(
                            "Network load (download) on {label} greater than {} kbit/s (average: {} kbit/s)",
                            nic.network_load_download,
                            bytes_to_kilobits(average).round()
                        )));
                    }
                }
            }

            if nic.enable_check_network_load_upload && nic.network_load_upload > 0.0 {
                let counters: Vec<CounterId> = targets
                    .iter()
                    .map(|target| CounterId::NetSentBytesPerSec(target.clone()))
                    .collect();
                let sampled = self.sampler.sample_sum(&counters, cancel).await;
                if let Some(average) = sample_or_abstain(self.name(), sampled)? {
                    if average > kilobits_to_bytes(nic.network_load_upload) {
                        return Ok(CheckSuspendResult::suspend(format!(
                            "Network load (upload) on {label} greater than {} kbit/s (average: {} kbit/s)",
                            nic.network_load_upload,
                            bytes_to_kilobits(average).round()
                        )));
                    }
                }
            }
        }

        Ok(CheckSuspendResult::permit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{test_settings, HddToMonitor, NetworkInterfaceToMonitor};
    use crate::testutil::{cancel_channel, ScriptedProvider};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn shared(provider: ScriptedProvider) -> Arc<Mutex<ScriptedProvider>> {
        Arc::new(Mutex::new(provider))
    }

    fn fast_sampler(provider: &Arc<Mutex<ScriptedProvider>>) -> MetricSampler {
        MetricSampler::with_probes(provider.clone(), 5, Duration::from_millis(0))
    }

    #[tokio::test]
    async fn cpu_load_trips_above_threshold_with_formatted_reason() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::CpuLoad, 85.0));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = true;
        settings.cpu_load = 80.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert!(result.suspend_standby);
        assert_eq!(result.reason, "CPU load greater than 80% (average: 85%)");
    }

    #[tokio::test]
    async fn cpu_load_below_threshold_permits_standby() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::CpuLoad, 75.0));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = true;
        settings.cpu_load = 80.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(result, CheckSuspendResult::permit());
    }

    #[tokio::test]
    async fn comparison_is_strictly_greater() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::CpuLoad, 80.0));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = true;
        settings.cpu_load = 80.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert!(!result.suspend_standby);
    }

    #[tokio::test]
    async fn disabled_check_never_invokes_the_sampler() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::CpuLoad, 99.0));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = false;
        settings.cpu_load = 10.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(result, CheckSuspendResult::permit());
        assert_eq!(provider.lock().unwrap().reads, 0);
    }

    #[tokio::test]
    async fn zero_threshold_means_not_configured() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::CpuLoad, 99.0));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = true;
        settings.cpu_load = 0.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(result, CheckSuspendResult::permit());
        assert_eq!(provider.lock().unwrap().reads, 0);
    }

    #[tokio::test]
    async fn sampling_failure_abstains_instead_of_tripping() {
        // Queue runs dry after two probes, mimicking an invalidated counter.
        let provider =
            shared(ScriptedProvider::new().queue(CounterId::CpuLoad, vec![90.0, 90.0]));
        let mut check = CpuLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_cpu_load = true;
        settings.cpu_load = 10.0;
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(result, CheckSuspendResult::permit());
    }

    #[tokio::test]
    async fn identical_inputs_yield_identical_results() {
        let provider = shared(ScriptedProvider::new().constant(CounterId::MemoryLoad, 91.0));
        let mut check = MemoryLoadCheck::new(fast_sampler(&provider));
        let mut settings = test_settings();
        settings.enable_check_memory_load = true;
        settings.memory_load = 90.0;
        let (_tx, mut cancel) = cancel_channel();

        let first = check.check_standby(&settings, &mut cancel).await.unwrap();
        let second = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(first, second);
        assert!(first.suspend_standby);
    }

    #[tokio::test]
    async fn hdd_all_volumes_compares_the_summed_average() {
        let provider = shared(
            ScriptedProvider::new()
                .volumes(&["sda", "sdb"])
                .constant(CounterId::DiskBytesPerSec("sda".to_string()), 300.0 * 1024.0)
                .constant(CounterId::DiskBytesPerSec("sdb".to_string()), 300.0 * 1024.0),
        );
        let sampler = fast_sampler(&provider);
        let mut check = HddLoadCheck::new(provider, sampler);
        let mut settings = test_settings();
        settings.hdds_to_monitor = vec![HddToMonitor {
            drive: ALL_TARGETS.to_string(),
            enable_check_hdd_load: true,
            hdd_load: 500.0,
        }];
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert!(result.suspend_standby);
        assert_eq!(
            result.reason,
            "Disk load on all volumes greater than 500 KB/s (average: 600 KB/s)"
        );
    }

    #[tokio::test]
    async fn absent_volume_is_skipped_not_tripped() {
        let provider = shared(ScriptedProvider::new().volumes(&["sda"]));
        let sampler = fast_sampler(&provider);
        let mut check = HddLoadCheck::new(provider.clone(), sampler);
        let mut settings = test_settings();
        settings.hdds_to_monitor = vec![HddToMonitor {
            drive: "sdz".to_string(),
            enable_check_hdd_load: true,
            hdd_load: 100.0,
        }];
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert_eq!(result, CheckSuspendResult::permit());
        assert_eq!(provider.lock().unwrap().reads, 0);
    }

    #[tokio::test]
    async fn network_total_direction_trips_before_download() {
        let rx = CounterId::NetReceivedBytesPerSec("eth0".to_string());
        let tx_counter = CounterId::NetSentBytesPerSec("eth0".to_string());
        // 1000 kbit/s down + 1000 kbit/s up: total 2000 kbit/s.
        let provider = shared(
            ScriptedProvider::new()
                .constant(rx, 125_000.0)
                .constant(tx_counter, 125_000.0),
        );
        let sampler = fast_sampler(&provider);
        let mut check = NetworkLoadCheck::new(provider, sampler);
        let mut settings = test_settings();
        settings.network_interfaces_to_monitor = vec![NetworkInterfaceToMonitor {
            network_interface: "eth0".to_string(),
            enable_check_network_load_total: true,
            network_load_total: 1500.0,
            enable_check_network_load_download: true,
            network_load_download: 500.0,
            enable_check_network_load_upload: false,
            network_load_upload: 0.0,
        }];
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert!(result.suspend_standby);
        assert!(
            result.reason.starts_with("Network load (total)"),
            "total must be evaluated first, got: {}",
            result.reason
        );
    }

    #[tokio::test]
    async fn network_upload_direction_trips_when_only_upload_is_over() {
        let rx = CounterId::NetReceivedBytesPerSec("eth0".to_string());
        let tx_counter = CounterId::NetSentBytesPerSec("eth0".to_string());
        let provider = shared(
            ScriptedProvider::new()
                .constant(rx, 0.0)
                .constant(tx_counter, 125_000.0),
        );
        let sampler = fast_sampler(&provider);
        let mut check = NetworkLoadCheck::new(provider, sampler);
        let mut settings = test_settings();
        settings.network_interfaces_to_monitor = vec![NetworkInterfaceToMonitor {
            network_interface: "eth0".to_string(),
            enable_check_network_load_total: false,
            network_load_total: 0.0,
            enable_check_network_load_download: true,
            network_load_download: 2000.0,
            enable_check_network_load_upload: true,
            network_load_upload: 500.0,
        }];
        let (_tx, mut cancel) = cancel_channel();

        let result = check.check_standby(&settings, &mut cancel).await.unwrap();
        assert!(result.suspend_standby);
        assert_eq!(
            result.reason,
            "Network load (upload) on interface 'eth0' greater than 500 kbit/s (average: 1000 kbit/s)"
        );
    }
}
