use std::time::Duration;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_APPROVAL_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_APPROVAL_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-session engine configuration.
///
/// Constructed at session start and handed to whichever component needs it;
/// there is deliberately no process-wide default instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an approval request may stay pending before the coordinator
    /// synthesizes an `expired` rejection.
    pub approval_timeout: Duration,
}

impl EngineConfig {
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout.clamp(MIN_APPROVAL_TIMEOUT, MAX_APPROVAL_TIMEOUT);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }
}
