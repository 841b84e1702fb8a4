pub mod load;
pub mod presence;
pub mod uptime;

use crate::config::Settings;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Verdict of one policy check. Produced fresh on every invocation; the
/// reason is a complete sentence when standby is suppressed and empty
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckSuspendResult {
    pub suspend_standby: bool,
    pub reason: String,
}

impl CheckSuspendResult {
    pub fn permit() -> Self {
        Self::default()
    }

    pub fn suspend(reason: impl Into<String>) -> Self {
        Self {
            suspend_standby: true,
            reason: reason.into(),
        }
    }
}

/// Only cancellation escapes a check; every recoverable probe failure is
/// logged inside the check and turned into an abstention there.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("check was cancelled")]
    Cancelled,
}

/// One "should standby be suppressed right now" policy. The engine treats
/// every implementation uniformly regardless of the mechanism behind it.
#[async_trait]
pub trait StandbyCheck: Send {
    fn name(&self) -> &'static str;

    async fn check_standby(
        &mut self,
        settings: &Settings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CheckSuspendResult, CheckError>;
}
