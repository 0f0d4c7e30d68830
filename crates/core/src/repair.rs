//! Why a case ended up on the repair path.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairSource {
    /// The automation engine crashed while executing the case.
    HarnessError,
    /// The owner connector refused or could not receive the result.
    DeliveryFailure,
    /// No result arrived within the running timeout.
    RunningTimeout,
    /// The worker holding the case disconnected or stopped answering.
    WorkerLost,
    /// The run that owns the case was deleted while the case was in flight.
    StaleOwner,
}

impl RepairSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairSource::HarnessError => "harness_error",
            RepairSource::DeliveryFailure => "delivery_failure",
            RepairSource::RunningTimeout => "running_timeout",
            RepairSource::WorkerLost => "worker_lost",
            RepairSource::StaleOwner => "stale_owner",
        }
    }
}
