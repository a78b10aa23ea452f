use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};
use crate::mapping::{self, ColumnMapping};

/// A CSV file selected by the operator.
#[derive(Clone)]
pub struct UploadedFile {
    name: String,
    bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Column headers found in the first row of the file.
    pub fn headers(&self) -> Result<Vec<String>> {
        mapping::read_headers(&self.bytes)
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The data source a job verifies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetProfile {
    Georgia,
    California,
}

impl TargetProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetProfile::Georgia => "georgia",
            TargetProfile::California => "california",
        }
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetProfile {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "georgia" => Ok(TargetProfile::Georgia),
            "california" => Ok(TargetProfile::California),
            other => Err(VerifyError::Validation(format!(
                "unknown target profile '{}'",
                other
            ))),
        }
    }
}

/// API key handed to the backend. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Everything needed to start one verification job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub file: UploadedFile,
    pub credential: Credential,
    pub profile: TargetProfile,
    pub mapping: ColumnMapping,
}

impl JobRequest {
    pub fn new(
        file: UploadedFile,
        credential: Credential,
        profile: TargetProfile,
        mapping: ColumnMapping,
    ) -> Self {
        Self {
            file,
            credential,
            profile,
            mapping,
        }
    }

    /// Checks everything that can be checked without the backend.
    pub fn validate(&self) -> Result<()> {
        if self.file.is_empty() {
            return Err(VerifyError::Validation(format!(
                "file '{}' is empty",
                self.file.name()
            )));
        }
        if self.credential.is_blank() {
            return Err(VerifyError::Validation("API key is missing".into()));
        }
        let headers = self.file.headers().map_err(|e| {
            VerifyError::Validation(format!("cannot read headers of '{}': {}", self.file.name(), e))
        })?;
        self.mapping.validate(&headers)
    }
}

/// Identifier of a queued backend job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_csv() -> UploadedFile {
        UploadedFile::new(
            "people.csv",
            b"First,Last,Admitted\nJane,Doe,1/2/2003\n".to_vec(),
        )
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new("First", "Last", "Admitted")
    }

    #[test]
    fn complete_request_validates() {
        let request = JobRequest::new(
            people_csv(),
            Credential::new("key"),
            TargetProfile::Georgia,
            mapping(),
        );
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_file_is_rejected() {
        let request = JobRequest::new(
            UploadedFile::new("empty.csv", Vec::new()),
            Credential::new("key"),
            TargetProfile::Georgia,
            mapping(),
        );
        assert!(matches!(request.validate(), Err(VerifyError::Validation(_))));
    }

    #[test]
    fn unreadable_headers_are_a_validation_error() {
        let request = JobRequest::new(
            UploadedFile::new("blank-header.csv", b",,\n1,2\n".to_vec()),
            Credential::new("key"),
            TargetProfile::Georgia,
            mapping(),
        );
        let err = request.validate().unwrap_err();
        assert!(matches!(err, VerifyError::Validation(ref m) if m.contains("blank-header.csv")));
    }

    #[test]
    fn blank_credential_is_rejected() {
        let request = JobRequest::new(
            people_csv(),
            Credential::new("   "),
            TargetProfile::California,
            mapping(),
        );
        let err = request.validate().unwrap_err();
        assert_eq!(err, VerifyError::Validation("API key is missing".into()));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let shown = format!("{:?}", Credential::new("super-secret"));
        assert!(!shown.contains("super-secret"));
    }

    #[test]
    fn profile_parses_case_insensitively() {
        assert_eq!(
            "California".parse::<TargetProfile>().unwrap(),
            TargetProfile::California
        );
        assert!("texas".parse::<TargetProfile>().is_err());
        assert_eq!(TargetProfile::Georgia.to_string(), "georgia");
    }
}
