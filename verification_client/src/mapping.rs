use std::fmt;

use serde::Serialize;

use crate::error::{Result, VerifyError};

/// The fixed attributes every uploaded row must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalField {
    FirstName,
    LastName,
    AdmitDate,
}

impl LogicalField {
    pub const ALL: [LogicalField; 3] = [
        LogicalField::FirstName,
        LogicalField::LastName,
        LogicalField::AdmitDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalField::FirstName => "first name",
            LogicalField::LastName => "last name",
            LogicalField::AdmitDate => "admit date",
        }
    }

    fn matches_header(&self, header: &str) -> bool {
        let header = header.to_lowercase();
        match self {
            LogicalField::FirstName => header.contains("first"),
            LogicalField::LastName => header.contains("last"),
            LogicalField::AdmitDate => header.contains("admit") || header.contains("admission"),
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source column feeds each logical field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    #[serde(rename = "first name")]
    pub first_name: String,
    #[serde(rename = "last name")]
    pub last_name: String,
    #[serde(rename = "admit date")]
    pub admit_date: String,
}

impl ColumnMapping {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        admit_date: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            admit_date: admit_date.into(),
        }
    }

    /// Best-effort guess from header names. The first header matching a field
    /// wins; a header is only tested against the first field it matches.
    pub fn propose(headers: &[String]) -> Self {
        let mut mapping = ColumnMapping::default();
        for header in headers {
            let target = LogicalField::ALL
                .into_iter()
                .find(|field| field.matches_header(header));
            if let Some(field) = target {
                if mapping.get(field).is_empty() {
                    mapping.set(field, header.clone());
                }
            }
        }
        mapping
    }

    pub fn get(&self, field: LogicalField) -> &str {
        match field {
            LogicalField::FirstName => &self.first_name,
            LogicalField::LastName => &self.last_name,
            LogicalField::AdmitDate => &self.admit_date,
        }
    }

    pub fn set(&mut self, field: LogicalField, column: impl Into<String>) {
        let column = column.into();
        match field {
            LogicalField::FirstName => self.first_name = column,
            LogicalField::LastName => self.last_name = column,
            LogicalField::AdmitDate => self.admit_date = column,
        }
    }

    /// Fields that still have no column assigned.
    pub fn missing(&self) -> Vec<LogicalField> {
        LogicalField::ALL
            .into_iter()
            .filter(|field| self.get(*field).trim().is_empty())
            .collect()
    }

    /// Every field must be mapped, and only to a column the file has.
    pub fn validate(&self, headers: &[String]) -> Result<()> {
        let missing = self.missing();
        if !missing.is_empty() {
            let names: Vec<_> = missing.iter().map(LogicalField::as_str).collect();
            return Err(VerifyError::Validation(format!(
                "please map all required fields (missing: {})",
                names.join(", ")
            )));
        }
        for field in LogicalField::ALL {
            let column = self.get(field);
            if !headers.iter().any(|h| h == column) {
                return Err(VerifyError::Validation(format!(
                    "column '{}' mapped to '{}' is not in the file",
                    column, field
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        // A struct of three strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Reads the header row of a CSV document.
pub fn read_headers(bytes: &[u8]) -> Result<Vec<String>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .filter(|h| !h.trim().is_empty())
        .map(str::to_string)
        .collect();

    if headers.is_empty() {
        return Err(VerifyError::Csv("could not read headers from CSV".into()));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn propose_maps_common_header_names() {
        let mapping = ColumnMapping::propose(&headers(&["FirstName", "LastName", "Admission Date"]));
        assert_eq!(mapping, ColumnMapping::new("FirstName", "LastName", "Admission Date"));
    }

    #[test]
    fn propose_keeps_first_match_and_leaves_gaps() {
        let mapping = ColumnMapping::propose(&headers(&["First", "first initial", "Surname"]));
        assert_eq!(mapping.first_name, "First");
        assert_eq!(
            mapping.missing(),
            vec![LogicalField::LastName, LogicalField::AdmitDate]
        );
    }

    #[test]
    fn validate_reports_missing_fields() {
        let mapping = ColumnMapping::new("First", "", "");
        let err = mapping.validate(&headers(&["First"])).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Validation(
                "please map all required fields (missing: last name, admit date)".into()
            )
        );
    }

    #[test]
    fn validate_rejects_unknown_columns() {
        let mapping = ColumnMapping::new("First", "Last", "Date");
        let err = mapping.validate(&headers(&["First", "Last", "Admitted"])).unwrap_err();
        assert!(err.to_string().contains("'Date'"));
    }

    #[test]
    fn mapping_serializes_with_logical_field_names() {
        let json = ColumnMapping::new("F", "L", "A").to_json();
        assert_eq!(json, r#"{"first name":"F","last name":"L","admit date":"A"}"#);
    }

    #[test]
    fn read_headers_skips_bom_and_blank_names() {
        let found = read_headers(b"\xEF\xBB\xBFFirst, Last ,,Admit\nA,B,,C\n").unwrap();
        assert_eq!(found, headers(&["First", " Last ", "Admit"]));
    }

    #[test]
    fn read_headers_fails_on_empty_input() {
        assert!(matches!(read_headers(b""), Err(VerifyError::Csv(_))));
    }
}
