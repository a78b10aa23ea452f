use serde::Serialize;

use crate::ResultRow;

/// Aggregate counts over a finished result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub matched: usize,
    pub not_found: usize,
    pub mismatch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    NotFound,
    Mismatch,
    Matched,
    Other,
}

impl StatusCategory {
    /// Buckets a free-text status. Checked in priority order so a status
    /// lands in exactly one bucket.
    pub fn of(status: Option<&str>) -> Self {
        let Some(status) = status else {
            return StatusCategory::Other;
        };
        let status = status.to_lowercase();
        if status.contains("not found") {
            StatusCategory::NotFound
        } else if status.contains("mismatch") || status.contains("failed") {
            StatusCategory::Mismatch
        } else if status.contains("active") || status.contains("inactive") {
            StatusCategory::Matched
        } else {
            StatusCategory::Other
        }
    }
}

pub fn summarize(results: &[ResultRow]) -> Summary {
    results.iter().fold(
        Summary {
            total: results.len(),
            ..Summary::default()
        },
        |mut summary, row| {
            match StatusCategory::of(row.status().as_deref()) {
                StatusCategory::NotFound => summary.not_found += 1,
                StatusCategory::Mismatch => summary.mismatch += 1,
                StatusCategory::Matched => summary.matched += 1,
                StatusCategory::Other => {}
            }
            summary
        },
    )
}
