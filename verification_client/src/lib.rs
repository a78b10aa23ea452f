pub mod config;
pub mod error;
pub mod export;
pub mod logs;
pub mod mapping;
pub mod observer;
pub mod request;
pub mod stream;
pub mod submitter;
pub mod summary;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use config::{ClientConfig, TransportMode};
pub use error::VerifyError;
pub use mapping::{ColumnMapping, LogicalField};
pub use observer::{JobState, ObserverEvent, Outcome, ProgressObserver, VerificationClient};
pub use request::{Credential, JobHandle, JobRequest, TargetProfile, UploadedFile};

/// One verified person as reported by the backend.
///
/// Rows keep the backend's column order, which the exporter relies on.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ResultRow {
    fields: Map<String, Value>,
}

pub type ResultSet = Vec<ResultRow>;

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Column names in backend order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Text of a column, `None` when missing, null or empty.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn first_name(&self) -> Option<String> {
        self.get(LogicalField::FirstName.as_str())
    }

    pub fn last_name(&self) -> Option<String> {
        self.get(LogicalField::LastName.as_str())
    }

    pub fn admit_date(&self) -> Option<String> {
        self.get(LogicalField::AdmitDate.as_str())
    }

    pub fn status(&self) -> Option<String> {
        self.get("status")
    }

    pub fn discipline(&self) -> Option<String> {
        self.get("discipline")
    }

    pub fn profile_link(&self) -> Option<String> {
        self.get("profile links")
    }

    pub fn unmatched_profile_link(&self) -> Option<String> {
        self.get("unmatched profile links")
    }
}

/// Parses a serialized result set (a JSON array of objects).
pub fn parse_results(payload: &str) -> Result<ResultSet, VerifyError> {
    serde_json::from_str(payload.trim()).map_err(|e| VerifyError::ResultParse(e.to_string()))
}
