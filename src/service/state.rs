//! Lifecycle states of the managed service

use std::fmt;

use tracing::info;

use super::record::ServiceRecord;

/// Where the managed service stands.
///
/// `Installing` and `Removed` only exist while an operation runs; the others
/// are derived from disk and the container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Absent,
    Installing,
    Active,
    Stopped,
    Removed,
    /// Working directory present without a service record
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Absent => "absent",
            ServiceState::Installing => "installing",
            ServiceState::Active => "active",
            ServiceState::Stopped => "stopped",
            ServiceState::Removed => "removed",
            ServiceState::Failed => "failed (partial install)",
        };
        f.write_str(name)
    }
}

/// Derives the current state.
pub fn derive(
    workdir_exists: bool,
    record: Option<&ServiceRecord>,
    container_status: Option<&str>,
) -> ServiceState {
    match (workdir_exists, record) {
        (false, _) => ServiceState::Absent,
        (true, None) => ServiceState::Failed,
        (true, Some(_)) if container_status.is_some_and(|s| s.contains("Up")) => {
            ServiceState::Active
        }
        (true, Some(_)) => ServiceState::Stopped,
    }
}

/// Logs a state transition.
pub fn transition(from: ServiceState, to: ServiceState) -> ServiceState {
    if from != to {
        info!("Service state: {} -> {}", from, to);
    }
    to
}
