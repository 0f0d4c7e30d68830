use std::fmt;

use serde::{Deserialize, Serialize};

/// Runs are identified by a UUID assigned at submission time.
pub type RunId = uuid::Uuid;

/// Test case identifiers are supplied by the submitter and unique within a run.
pub type CaseId = String;

/// Opaque identifier of one worker connection.
pub type ConnectionId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identity of one dispatch unit across the pending and in-flight sets.
///
/// Two runs may contain test cases with the same `case_id`, so the run id is
/// part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseKey {
    pub run_id: RunId,
    pub case_id: CaseId,
}

impl CaseKey {
    pub fn new(run_id: RunId, case_id: impl Into<CaseId>) -> Self {
        Self {
            run_id,
            case_id: case_id.into(),
        }
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.case_id)
    }
}
