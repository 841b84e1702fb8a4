use crate::config::Settings;
use crate::provider::ProviderError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

/// Earliest future wake time among the enabled uptime schedulers, or `None`
/// when nothing is due. Recomputed every cycle since the schedulers are part
/// of the re-loaded settings.
pub fn next_wake_due(settings: &Settings, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    settings
        .uptime_schedulers
        .iter()
        .filter(|scheduler| scheduler.enable_uptime_scheduler)
        .filter_map(|scheduler| scheduler.next_due_time)
        .filter(|due| *due > now)
        .min()
}

/// OS wake-timer facility. The real backend is platform specific and lives
/// outside this crate; the daemon ships a log-only backend.
pub trait WakeTimer: Send {
    fn program(&mut self, at: DateTime<Utc>) -> Result<(), ProviderError>;
    fn cancel(&mut self) -> Result<(), ProviderError>;
}

#[derive(Default)]
pub struct LogWakeTimer {
    armed: Option<DateTime<Utc>>,
}

impl LogWakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Option<DateTime<Utc>> {
        self.armed
    }
}

impl WakeTimer for LogWakeTimer {
    fn program(&mut self, at: DateTime<Utc>) -> Result<(), ProviderError> {
        if self.armed == Some(at) {
            return Ok(());
        }
        self.armed = Some(at);
        let lead = (at - Utc::now()).to_std().unwrap_or_default();
        info!(
            wake_at = %at.format("%Y-%m-%d %H:%M:%S %Z"),
            lead = %humantime::format_duration(Duration::from_secs(lead.as_secs())),
            "wake timer armed"
        );
        Ok(())
    }

    fn cancel(&mut self) -> Result<(), ProviderError> {
        if self.armed.take().is_some() {
            info!("wake timer disarmed");
        }
        Ok(())
    }
}

/// OS standby-suppression facility, same arrangement as `WakeTimer`: a seam
/// with a log-only default backend.
pub trait StandbyController: Send {
    fn set_standby_suppressed(&mut self, suppressed: bool, reason: &str)
        -> Result<(), ProviderError>;
}

#[derive(Default)]
pub struct LogStandbyController {
    suppressed: Option<bool>,
}

impl LogStandbyController {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StandbyController for LogStandbyController {
    fn set_standby_suppressed(
        &mut self,
        suppressed: bool,
        reason: &str,
    ) -> Result<(), ProviderError> {
        if self.suppressed == Some(suppressed) {
            return Ok(());
        }
        self.suppressed = Some(suppressed);
        if suppressed {
            info!(%reason, "standby is now suppressed");
        } else {
            info!("standby is now permitted");
        }
        Ok(())
    }
}
