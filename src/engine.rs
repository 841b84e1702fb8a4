use crate::checks::load::{CpuLoadCheck, HddLoadCheck, MemoryLoadCheck, NetworkLoadCheck};
use crate::checks::presence::{
    NetworkMachinesCheck, NetworkResourcesCheck, ProcessesCheck, SmbstatusProbe, SysinfoProcessProbe,
    SystemPinger,
};
use crate::checks::uptime::{ScheduledUptimeCheck, TemporaryUptime, TemporaryUptimeCheck};
use crate::checks::{CheckError, StandbyCheck};
use crate::config::Settings;
use crate::plugin::{PluginIdentity, PluginInstance};
use crate::sampler::{MetricSampler, SharedProvider};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of one monitoring cycle. When standby is suppressed, `reason` is
/// the tripping policy's reason verbatim and `source` names that policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub suspend_standby: bool,
    pub reason: String,
    pub source: Option<String>,
}

impl Decision {
    pub fn permit() -> Self {
        Self {
            suspend_standby: false,
            reason: String::new(),
            source: None,
        }
    }

    fn suppressed_by(source: impl Into<String>, reason: String) -> Self {
        Self {
            suspend_standby: true,
            reason,
            source: Some(source.into()),
        }
    }
}

/// The built-in checks in their fixed priority order: cheap clock-window
/// policies first, load sampling in the middle, network probing last.
pub fn standard_checks(
    provider: SharedProvider,
    probe_count: u32,
    probe_interval: Duration,
    temporary_uptime: TemporaryUptime,
) -> Vec<Box<dyn StandbyCheck>> {
    let sampler =
        |provider: &SharedProvider| MetricSampler::with_probes(provider.clone(), probe_count, probe_interval);
    vec![
        Box::new(TemporaryUptimeCheck::new(temporary_uptime)),
        Box::new(ScheduledUptimeCheck),
        Box::new(CpuLoadCheck::new(sampler(&provider))),
        Box::new(MemoryLoadCheck::new(sampler(&provider))),
        Box::new(HddLoadCheck::new(provider.clone(), sampler(&provider))),
        Box::new(NetworkLoadCheck::new(provider.clone(), sampler(&provider))),
        Box::new(NetworkMachinesCheck::new(Box::new(SystemPinger::default()))),
        Box::new(ProcessesCheck::new(Box::new(SysinfoProcessProbe::new()))),
        Box::new(NetworkResourcesCheck::new(Box::new(SmbstatusProbe))),
    ]
}

/// Evaluates every enabled policy in order, first suppression verdict wins.
/// The check list and the plugin list are built once at startup; enable
/// flags inside the settings are consulted by the checks each cycle.
pub struct StandbyDecisionEngine {
    checks: Vec<Box<dyn StandbyCheck>>,
    plugins: Vec<PluginInstance>,
}

impl StandbyDecisionEngine {
    pub fn new(checks: Vec<Box<dyn StandbyCheck>>, plugins: Vec<PluginInstance>) -> Self {
        Self { checks, plugins }
    }

    /// Runs `initialize` on every registered plugin. A plugin that fails
    /// here is excluded from all cycles until the service restarts.
    pub fn initialize_plugins(&mut self) {
        for instance in &mut self.plugins {
            let identity = instance.identity().clone();
            match instance.initialize() {
                Ok(()) => {
                    info!(plugin = %identity.name, version = %identity.version, guid = %identity.guid, "plugin initialized");
                }
                Err(err) => {
                    warn!(
                        plugin = %identity.name,
                        guid = %identity.guid,
                        error = %err,
                        "plugin failed to initialize and is excluded until restart"
                    );
                }
            }
        }
    }

    pub fn active_plugins(&self) -> Vec<PluginIdentity> {
        self.plugins
            .iter()
            .filter(|instance| instance.is_active())
            .map(|instance| instance.identity().clone())
            .collect()
    }

    pub async fn evaluate(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Decision, CheckError> {
        for check in &mut self.checks {
            let result = check.check_standby(settings, cancel).await?;
            if result.suspend_standby {
                debug!(check = check.name(), reason = %result.reason, "check suppressed standby");
                return Ok(Decision::suppressed_by(check.name(), result.reason));
            }
        }

        for instance in &mut self.plugins {
            if !instance.is_active() {
                continue;
            }
            if *cancel.borrow() {
                return Err(CheckError::Cancelled);
            }
            let identity = instance.identity().clone();

            if let Err(err) = instance.prepare() {
                warn!(plugin = %identity.name, guid = %identity.guid, error = %err, "plugin prepare failed, plugin abstains this cycle");
                continue;
            }
            match instance.check_policy() {
                Ok(verdict) if verdict.suspend_standby => {
                    debug!(plugin = %identity.name, reason = %verdict.reason, "plugin suppressed standby");
                    return Ok(Decision::suppressed_by(
                        format!("plugin '{}'", identity.name),
                        verdict.reason,
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(plugin = %identity.name, guid = %identity.guid, error = %err, "plugin policy check failed, plugin abstains this cycle");
                }
            }
        }

        Ok(Decision::permit())
    }

    /// Tears every plugin down. Failures are logged and never block
    /// shutdown.
    pub fn shutdown(&mut self) {
        for instance in &mut self.plugins {
            let identity = instance.identity().clone();
            if let Err(err) = instance.tear_down() {
                warn!(plugin = %identity.name, guid = %identity.guid, error = %err, "plugin tear-down failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckSuspendResult;
    use crate::config::test_settings;
    use crate::plugin::{PluginError, PluginSettingsHandle, PluginSettingsStore, StandbyPlugin};
    use crate::testutil::cancel_channel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct StaticCheck {
        name: &'static str,
        result: CheckSuspendResult,
        calls: Arc<AtomicUsize>,
    }

    impl StaticCheck {
        fn new(name: &'static str, result: CheckSuspendResult) -> (Box<dyn StandbyCheck>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name,
                    result,
                    calls: calls.clone(),
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl StandbyCheck for StaticCheck {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn check_standby(
            &mut self,
            _settings: &Settings,
            _cancel: &mut tokio::sync::watch::Receiver<bool>,
        ) -> Result<CheckSuspendResult, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct NullStore;

    impl PluginSettingsStore for NullStore {
        fn load(&self, _guid: Uuid) -> Result<Option<serde_json::Value>, PluginError> {
            Ok(None)
        }

        fn save(&self, _guid: Uuid, _value: &serde_json::Value) -> Result<(), PluginError> {
            Ok(())
        }
    }

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct LoggingPlugin {
        tag: &'static str,
        log: CallLog,
        fail_initialize: bool,
        verdict: CheckSuspendResult,
    }

    impl LoggingPlugin {
        fn push(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{}:{event}", self.tag));
        }
    }

    impl StandbyPlugin for LoggingPlugin {
        fn initialize(&mut self, _settings: PluginSettingsHandle) -> Result<(), PluginError> {
            self.push("initialize");
            if self.fail_initialize {
                return Err(PluginError::Plugin("init refused".to_string()));
            }
            Ok(())
        }

        fn prepare(&mut self) -> Result<(), PluginError> {
            self.push("prepare");
            Ok(())
        }

        fn check_policy(&mut self) -> Result<CheckSuspendResult, PluginError> {
            self.push("check_policy");
            Ok(self.verdict.clone())
        }

        fn tear_down(&mut self) -> Result<(), PluginError> {
            self.push("tear_down");
            Ok(())
        }
    }

    fn plugin_instance(
        tag: &'static str,
        log: CallLog,
        fail_initialize: bool,
        verdict: CheckSuspendResult,
    ) -> PluginInstance {
        PluginInstance::new(
            PluginIdentity {
                name: tag.to_string(),
                version: "1.0.0".to_string(),
                guid: Uuid::new_v4(),
            },
            Box::new(LoggingPlugin {
                tag,
                log,
                fail_initialize,
                verdict,
            }),
            Arc::new(NullStore),
        )
    }

    #[tokio::test]
    async fn first_trip_wins_and_later_checks_are_not_invoked() {
        let (first, first_calls) = StaticCheck::new("first", CheckSuspendResult::permit());
        let (second, second_calls) =
            StaticCheck::new("second", CheckSuspendResult::suspend("reason2"));
        let (third, third_calls) = StaticCheck::new("third", CheckSuspendResult::suspend("reason3"));
        let mut engine = StandbyDecisionEngine::new(vec![first, second, third], vec![]);
        let (_tx, mut cancel) = cancel_channel();

        let decision = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();

        assert!(decision.suspend_standby);
        assert_eq!(decision.reason, "reason2");
        assert_eq!(decision.source.as_deref(), Some("second"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_trip_means_standby_permitted() {
        let (first, _) = StaticCheck::new("first", CheckSuspendResult::permit());
        let (second, _) = StaticCheck::new("second", CheckSuspendResult::permit());
        let mut engine = StandbyDecisionEngine::new(vec![first, second], vec![]);
        let (_tx, mut cancel) = cancel_channel();

        let decision = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();
        assert_eq!(decision, Decision::permit());
    }

    #[tokio::test]
    async fn builtin_trip_skips_plugins_for_the_cycle() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let (check, _) = StaticCheck::new("builtin", CheckSuspendResult::suspend("busy"));
        let plugin = plugin_instance("p1", log.clone(), false, CheckSuspendResult::permit());
        let mut engine = StandbyDecisionEngine::new(vec![check], vec![plugin]);
        engine.initialize_plugins();
        let (_tx, mut cancel) = cancel_channel();

        let decision = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();

        assert!(decision.suspend_standby);
        assert_eq!(log.lock().unwrap().as_slice(), ["p1:initialize"]);
    }

    #[tokio::test]
    async fn plugins_run_in_registration_order_with_prepare_before_check() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let first = plugin_instance("p1", log.clone(), false, CheckSuspendResult::permit());
        let second = plugin_instance(
            "p2",
            log.clone(),
            false,
            CheckSuspendResult::suspend("plugin busy"),
        );
        let third = plugin_instance("p3", log.clone(), false, CheckSuspendResult::permit());
        let mut engine = StandbyDecisionEngine::new(vec![], vec![first, second, third]);
        engine.initialize_plugins();
        let (_tx, mut cancel) = cancel_channel();

        let decision = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();

        assert!(decision.suspend_standby);
        assert_eq!(decision.reason, "plugin busy");
        assert_eq!(decision.source.as_deref(), Some("plugin 'p2'"));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            [
                "p1:initialize",
                "p2:initialize",
                "p3:initialize",
                "p1:prepare",
                "p1:check_policy",
                "p2:prepare",
                "p2:check_policy",
            ]
        );
    }

    #[tokio::test]
    async fn failed_initialize_excludes_the_plugin_from_every_cycle() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let broken = plugin_instance("broken", log.clone(), true, CheckSuspendResult::permit());
        let healthy = plugin_instance("healthy", log.clone(), false, CheckSuspendResult::permit());
        let mut engine = StandbyDecisionEngine::new(vec![], vec![broken, healthy]);
        engine.initialize_plugins();
        let (_tx, mut cancel) = cancel_channel();

        for _ in 0..2 {
            engine
                .evaluate(&test_settings(), &mut cancel)
                .await
                .unwrap();
        }

        let events = log.lock().unwrap();
        assert!(!events.iter().any(|event| event == "broken:prepare"));
        assert_eq!(
            events
                .iter()
                .filter(|event| event.as_str() == "healthy:prepare")
                .count(),
            2
        );
        assert_eq!(engine.active_plugins().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_tears_down_active_plugins() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let plugin = plugin_instance("p1", log.clone(), false, CheckSuspendResult::permit());
        let mut engine = StandbyDecisionEngine::new(vec![], vec![plugin]);
        engine.initialize_plugins();

        engine.shutdown();
        assert!(log.lock().unwrap().iter().any(|event| event == "p1:tear_down"));
        assert!(engine.active_plugins().is_empty());
    }

    #[tokio::test]
    async fn identical_cycles_yield_identical_decisions() {
        let (check, _) = StaticCheck::new("static", CheckSuspendResult::suspend("always busy"));
        let mut engine = StandbyDecisionEngine::new(vec![check], vec![]);
        let (_tx, mut cancel) = cancel_channel();

        let first = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();
        let second = engine
            .evaluate(&test_settings(), &mut cancel)
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
