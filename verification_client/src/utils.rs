use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;

use crate::export::export;
use crate::request::TargetProfile;
use crate::summary::Summary;
use crate::ResultRow;

pub fn save_json(data: &serde_json::Value, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(path)?;
    file.write_all(serde_json::to_string_pretty(data)?.as_bytes())?;
    println!("✅ {} created.", path.display());
    Ok(())
}

pub fn save_text(content: &str, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    println!("✅ {} created.", path.display());
    Ok(())
}

/// Default export file name for a profile.
pub fn export_file_name(profile: TargetProfile) -> String {
    format!("verification_results_{}.csv", profile)
}

/// Writes the CSV export to `output`, or to the profile's default file name.
/// Returns where it went, or `None` when there were no results to write.
pub fn save_export(
    results: &[ResultRow],
    profile: TargetProfile,
    output: Option<&Path>,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let Some(csv) = export(results) else {
        return Ok(None);
    };
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(export_file_name(profile)));
    save_text(&csv, &path)?;
    Ok(Some(path))
}

/// Raw results plus their summary, as written by `--json`.
pub fn results_document(
    profile: TargetProfile,
    summary: &Summary,
    results: &[ResultRow],
) -> serde_json::Value {
    json!({
        "state": profile,
        "generated_at": Utc::now().to_rfc3339(),
        "summary": summary,
        "results": results,
    })
}
