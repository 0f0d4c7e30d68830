pub mod configurations;
pub mod repairs;
pub mod runs;
pub mod workers;

use caseflow_core::types::RunId;

use crate::error::{AppError, AppResult};

/// Parse a run id path segment, answering with a JSON 400 on failure.
pub(crate) fn parse_run_id(raw: &str) -> AppResult<RunId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid run id")))
}
