use crate::ResultRow;

/// Renders results as comma-separated text, columns in the order of the
/// first row's keys. Every value is quoted. `None` when there is nothing to
/// export.
pub fn export(results: &[ResultRow]) -> Option<String> {
    let first = results.first()?;
    let columns: Vec<&str> = first.keys().collect();

    let header = columns
        .iter()
        .map(|name| header_cell(name))
        .collect::<Vec<_>>()
        .join(",");

    let mut lines = Vec::with_capacity(results.len() + 1);
    lines.push(header);
    for row in results {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| quote(&row.get(column).unwrap_or_default()))
            .collect();
        lines.push(cells.join(","));
    }
    Some(lines.join("\n"))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn header_cell(name: &str) -> String {
    if name.contains([',', '"', '\n', '\r']) {
        quote(name)
    } else {
        name.to_string()
    }
}
