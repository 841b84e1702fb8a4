use crate::checks::{CheckError, CheckSuspendResult, StandbyCheck};
use crate::config::{Settings, UptimeScheduler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

fn format_until(end: DateTime<Utc>) -> String {
    end.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// Suppression applies while "now" lies strictly between the window start
/// and its end; a window is never active at its exact start or end instant.
fn scheduled_uptime_result(
    schedulers: &[UptimeScheduler],
    now: DateTime<Utc>,
) -> CheckSuspendResult {
    for scheduler in schedulers {
        if !scheduler.enable_uptime_scheduler {
            continue;
        }
        let (Some(start), Some(end)) =
            (scheduler.next_due_time, scheduler.next_due_time_with_duration)
        else {
            continue;
        };
        if now > start && now < end {
            return CheckSuspendResult::suspend(format!(
                "Scheduled uptime active until {}",
                format_until(end)
            ));
        }
    }
    CheckSuspendResult::permit()
}

pub struct ScheduledUptimeCheck;

#[async_trait]
impl StandbyCheck for ScheduledUptimeCheck {
    fn name(&self) -> &'static str {
        "scheduled-uptime"
    }

    async fn check_standby(
        &mut self,
        settings: &Settings,
        _cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        Ok(scheduled_uptime_result(
            &settings.uptime_schedulers,
            Utc::now(),
        ))
    }
}

/// One-shot admin-initiated keep-awake override, shared between the check
/// and the HTTP surface that sets it. Expired end times are dropped on the
/// next read.
#[derive(Clone, Default)]
pub struct TemporaryUptime {
    inner: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl TemporaryUptime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_awake_until(&self, end: DateTime<Utc>) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(end);
    }

    pub fn clear(&self) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    pub fn active_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(end) if end > now => Some(end),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}

pub struct TemporaryUptimeCheck {
    uptime: TemporaryUptime,
}

impl TemporaryUptimeCheck {
    pub fn new(uptime: TemporaryUptime) -> Self {
        Self { uptime }
    }
}

#[async_trait]
impl StandbyCheck for TemporaryUptimeCheck {
    fn name(&self) -> &'static str {
        "temporary-uptime"
    }

    async fn check_standby(
        &mut self,
        _settings: &Settings,
        _cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError> {
        match self.uptime.active_until(Utc::now()) {
            Some(end) => Ok(CheckSuspendResult::suspend(format!(
                "Temporary uptime active until {}",
                format_until(end)
            ))),
            None => Ok(CheckSuspendResult::permit()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> UptimeScheduler {
        UptimeScheduler {
            enable_uptime_scheduler: true,
            next_due_time: Some(start),
            next_due_time_with_duration: Some(end),
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 22, 0, 0).unwrap()
    }

    #[test]
    fn inside_the_window_suppresses_standby() {
        let start = base_time();
        let end = start + Duration::hours(1);
        let result =
            scheduled_uptime_result(&[window(start, end)], start + Duration::minutes(30));
        assert!(result.suspend_standby);
        assert_eq!(
            result.reason,
            "Scheduled uptime active until 2026-08-07 23:00:00 UTC"
        );
    }

    #[test]
    fn after_the_window_permits_standby() {
        let start = base_time();
        let end = start + Duration::hours(1);
        let result = scheduled_uptime_result(&[window(start, end)], start + Duration::hours(2));
        assert_eq!(result, CheckSuspendResult::permit());
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let start = base_time();
        let end = start + Duration::hours(1);
        assert!(!scheduled_uptime_result(&[window(start, end)], start).suspend_standby);
        assert!(!scheduled_uptime_result(&[window(start, end)], end).suspend_standby);
    }

    #[test]
    fn disabled_scheduler_is_ignored() {
        let start = base_time();
        let mut scheduler = window(start, start + Duration::hours(1));
        scheduler.enable_uptime_scheduler = false;
        let result = scheduled_uptime_result(&[scheduler], start + Duration::minutes(30));
        assert_eq!(result, CheckSuspendResult::permit());
    }

    #[test]
    fn scheduler_without_due_times_is_ignored() {
        let scheduler = UptimeScheduler {
            enable_uptime_scheduler: true,
            next_due_time: None,
            next_due_time_with_duration: None,
        };
        let result = scheduled_uptime_result(&[scheduler], base_time());
        assert_eq!(result, CheckSuspendResult::permit());
    }

    #[test]
    fn temporary_uptime_is_active_until_its_end() {
        let now = base_time();
        let uptime = TemporaryUptime::new();
        uptime.keep_awake_until(now + Duration::minutes(30));

        assert_eq!(uptime.active_until(now), Some(now + Duration::minutes(30)));
        assert_eq!(uptime.active_until(now + Duration::hours(1)), None);
        // The expired end time was dropped; an earlier "now" no longer sees it.
        assert_eq!(uptime.active_until(now), None);
    }

    #[test]
    fn temporary_uptime_can_be_cleared() {
        let now = base_time();
        let uptime = TemporaryUptime::new();
        uptime.keep_awake_until(now + Duration::minutes(30));
        uptime.clear();
        assert_eq!(uptime.active_until(now), None);
    }
}
