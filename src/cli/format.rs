use std::cmp;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::models::FormattedResults;

/// Hit fields shown as table columns, in display order. Only columns
/// present in at least one hit are rendered.
const HIT_COLUMNS: &[&str] = &[
    "FlightNum",
    "Carrier",
    "OriginCityName",
    "DestCityName",
    "AvgTicketPrice",
    "DistanceKilometers",
    "FlightDelayMin",
    "timestamp",
];

const MAX_COLUMN_WIDTH: usize = 30;

const SEPARATOR_WIDTH: usize = 80;

/// Render results as a titled, pretty-printed JSON block framed by
/// separator lines.
pub fn render_text(title: &str, results: &FormattedResults) -> Result<String> {
    let separator = "-".repeat(SEPARATOR_WIDTH);
    let body = serde_json::to_string_pretty(results).context("failed to encode results")?;
    Ok(format!("\n{title}\n{separator}\n{body}\n{separator}\n"))
}

pub fn print_text(title: &str, results: &FormattedResults) -> Result<()> {
    print!("{}", render_text(title, results)?);
    Ok(())
}

/// Render hits (and aggregation buckets, when present) as aligned
/// tables.
pub fn render_table(results: &FormattedResults) -> String {
    let mut out = format!(
        "total_hits: {}  took_ms: {}\n",
        results.total_hits, results.took_ms
    );

    let columns: Vec<&str> = HIT_COLUMNS
        .iter()
        .copied()
        .filter(|column| results.hits.iter().any(|hit| hit.get(column).is_some()))
        .collect();

    if !columns.is_empty() {
        let rows: Vec<Vec<String>> = results
            .hits
            .iter()
            .map(|hit| columns.iter().map(|c| cell(hit.get(c))).collect())
            .collect();
        out.push('\n');
        out.push_str(&table(&columns, &rows));
    }

    if let Some(Value::Object(aggregations)) = &results.aggregations {
        for (name, aggregation) in aggregations {
            out.push('\n');
            out.push_str(&render_aggregation(name, aggregation));
        }
    }

    out
}

pub fn print_table(results: &FormattedResults) -> Result<()> {
    print!("{}", render_table(results));
    Ok(())
}

fn render_aggregation(name: &str, aggregation: &Value) -> String {
    if let Some(buckets) = aggregation.get("buckets").and_then(Value::as_array) {
        // Sub-aggregation metrics are objects carrying a `value`.
        let mut metrics: Vec<&str> = Vec::new();
        for bucket in buckets {
            if let Some(fields) = bucket.as_object() {
                for (key, value) in fields {
                    if value.get("value").is_some() && !metrics.contains(&key.as_str()) {
                        metrics.push(key.as_str());
                    }
                }
            }
        }

        let mut headers = vec!["KEY", "DOC_COUNT"];
        headers.extend(metrics.iter().copied());

        let rows: Vec<Vec<String>> = buckets
            .iter()
            .map(|bucket| {
                let mut row = vec![
                    cell(bucket.get("key_as_string").or_else(|| bucket.get("key"))),
                    cell(bucket.get("doc_count")),
                ];
                row.extend(
                    metrics
                        .iter()
                        .map(|metric| cell(bucket.get(*metric).and_then(|m| m.get("value")))),
                );
                row
            })
            .collect();

        return format!("{name}\n{}", table(&headers, &rows));
    }

    match aggregation.get("value") {
        Some(value) => format!("{name}: {}\n", cell(Some(value))),
        None => format!("{name}: {aggregation}\n"),
    }
}

fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let longest = rows
                .iter()
                .map(|row| row.get(idx).map(|c| c.chars().count()).unwrap_or(0))
                .max()
                .unwrap_or(0);
            cmp::min(cmp::max(header.len(), longest), MAX_COLUMN_WIDTH)
        })
        .collect();

    let mut out = String::new();
    out.push_str(&line(headers.iter().map(|h| h.to_string()), &widths));
    for row in rows {
        out.push_str(&line(row.iter().cloned(), &widths));
    }
    out
}

fn line(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", truncate(&cell, *width)))
        .collect();
    format!("{}\n", padded.join(" ").trim_end())
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.2}"),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

fn truncate(s: &str, max_width: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_width {
        s.to_string()
    } else if max_width <= 1 {
        "…".to_string()
    } else {
        s.chars()
            .take(max_width.saturating_sub(1))
            .collect::<String>()
            + "…"
    }
}
