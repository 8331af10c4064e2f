use std::path::Path;

#[cfg(not(all(feature = "with-serde", feature = "with-csv")))]
use anyhow::bail;
use anyhow::{Context, Result};

use mailprobe::{BatchReport, BatchStats, ValidationRecord, Verdict};

use crate::args::Format;

pub fn write_report(report: &BatchReport, format: Format, out: Option<&Path>) -> Result<()> {
    let body = match format {
        Format::Human => render_human(report),
        Format::Json => render_json(report)?,
        Format::Ndjson => render_ndjson(report)?,
        Format::Csv => render_csv(report)?,
    };
    match out {
        Some(path) => write_all_atomically(path, body.as_bytes()),
        None => {
            println!("{body}");
            Ok(())
        }
    }
}

/// Au moins une adresse invalide ou refusée (code de sortie 2).
pub fn any_rejected(report: &BatchReport) -> bool {
    report.records.iter().any(|record| {
        matches!(
            record.verdict,
            Verdict::Invalid | Verdict::NoMailServer | Verdict::Undeliverable
        )
    })
}

pub fn render_human(report: &BatchReport) -> String {
    let mut lines: Vec<String> = report.records.iter().map(human_line).collect();
    lines.push(summary_line(&report.stats(), report.interrupted));
    lines.join("\n")
}

fn human_line(record: &ValidationRecord) -> String {
    let mut line = format!(
        "[{}] {} score={} mx={} catchall={} disposable={} ({:.2}s)",
        record.verdict.to_string().to_uppercase(),
        record.email,
        record.quality_score,
        yes_no(record.has_mx),
        yes_no(record.is_catchall),
        yes_no(record.is_disposable),
        record.validation_time.as_secs_f64(),
    );
    if let Some(error) = &record.error {
        line.push_str(" :: ");
        line.push_str(error);
    }
    line
}

pub fn summary_line(stats: &BatchStats, interrupted: bool) -> String {
    let mut line = format!(
        "summary: total={} valid_syntax={} has_mx={} not_disposable={} not_catchall={} deliverable={} avg_score={:.2}",
        stats.total,
        stats.valid_syntax,
        stats.has_mx,
        stats.not_disposable,
        stats.not_catchall,
        stats.deliverable,
        stats.avg_quality_score,
    );
    if interrupted {
        line.push_str(" (interrupted)");
    }
    line
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(feature = "with-serde")]
fn render_json(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(&report.records).context("serialize report")
}

#[cfg(not(feature = "with-serde"))]
fn render_json(_: &BatchReport) -> Result<String> {
    bail!("format=json nécessite la feature 'with-serde'")
}

#[cfg(feature = "with-serde")]
fn render_ndjson(report: &BatchReport) -> Result<String> {
    let lines = report
        .records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("serialize report")?;
    Ok(lines.join("\n"))
}

#[cfg(not(feature = "with-serde"))]
fn render_ndjson(_: &BatchReport) -> Result<String> {
    bail!("format=ndjson nécessite la feature 'with-serde'")
}

#[cfg(feature = "with-csv")]
pub const CSV_HEADER: [&str; 10] = [
    "email",
    "is_valid",
    "has_mx_record",
    "is_disposable",
    "is_catchall",
    "is_deliverable",
    "quality_score",
    "validation_time",
    "error",
    "validation_date",
];

#[cfg(feature = "with-csv")]
fn render_csv(report: &BatchReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(CSV_HEADER)?;
    for record in &report.records {
        wtr.write_record(csv_record(record))?;
    }
    let data = wtr.into_inner().context("flush CSV")?;
    let text = String::from_utf8(data).context("CSV is not UTF-8")?;
    Ok(text.trim_end().to_string())
}

#[cfg(not(feature = "with-csv"))]
fn render_csv(_: &BatchReport) -> Result<String> {
    bail!("format=csv nécessite la feature 'with-csv'")
}

#[cfg(feature = "with-csv")]
pub fn csv_record(record: &ValidationRecord) -> [String; 10] {
    [
        record.email.clone(),
        record.is_syntax_valid.to_string(),
        record.has_mx.to_string(),
        record.is_disposable.to_string(),
        record.is_catchall.to_string(),
        record.is_deliverable.to_string(),
        record.quality_score.to_string(),
        format!("{:.3}", record.validation_time.as_secs_f64()),
        record.error.clone().unwrap_or_default(),
        record.last_checked.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
}

fn write_all_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut f = std::fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.write_all(b"\n")?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
