use crate::engine::Decision;
use crate::plugin::PluginIdentity;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub guid: String,
}

impl From<&PluginIdentity> for PluginInfo {
    fn from(identity: &PluginIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            version: identity.version.clone(),
            guid: identity.guid.to_string(),
        }
    }
}

/// Last decision and cycle bookkeeping, shared with the HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_cycle_unix: i64,
    pub cycle_count: u64,
    pub standby_suppressed: bool,
    pub suppress_reason: String,
    pub suppress_source: Option<String>,
    pub next_wake_unix: Option<i64>,
    pub temporary_uptime_until_unix: Option<i64>,
    pub active_plugins: Vec<PluginInfo>,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn update_cycle(
        &mut self,
        now_unix: i64,
        decision: &Decision,
        next_wake: Option<DateTime<Utc>>,
        temporary_uptime_until: Option<DateTime<Utc>>,
    ) {
        self.last_cycle_unix = now_unix;
        self.cycle_count += 1;
        self.standby_suppressed = decision.suspend_standby;
        self.suppress_reason = decision.reason.clone();
        self.suppress_source = decision.source.clone();
        self.next_wake_unix = next_wake.map(|at| at.timestamp());
        self.temporary_uptime_until_unix = temporary_uptime_until.map(|at| at.timestamp());
    }

    pub fn set_active_plugins(&mut self, identities: &[PluginIdentity]) {
        self.active_plugins = identities.iter().map(PluginInfo::from).collect();
    }
}
