use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::args::{Cli, Format};

/// Rassemble les adresses : arguments, puis `--input`, puis stdin.
pub fn collect(cli: &Cli) -> Result<Vec<String>> {
    let mut lines = cli.emails.clone();
    if let Some(path) = &cli.input {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            lines.push(line.with_context(|| format!("read {}", path.display()))?);
        }
    }
    if cli.stdin {
        for line in io::stdin().lock().lines() {
            lines.push(line.context("read stdin")?);
        }
    }
    Ok(clean(lines))
}

/// Nettoie la liste : espaces retirés, minuscules, lignes sans `@` écartées,
/// doublons supprimés en gardant la première occurrence.
pub fn clean<I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| line.contains('@'))
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

/// Adresses déjà présentes dans un rapport csv/ndjson ; vide si le fichier
/// n'existe pas encore.
pub fn previously_validated(path: &Path, format: Format) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    match format {
        Format::Csv => emails_in_csv(path),
        Format::Ndjson => emails_in_ndjson(path),
        other => bail!("--resume ne reprend que les rapports csv ou ndjson (format={other:?})"),
    }
}

#[cfg(feature = "with-csv")]
fn emails_in_csv(path: &Path) -> Result<HashSet<String>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let column = rdr
        .headers()?
        .iter()
        .position(|name| name == "email")
        .with_context(|| format!("{}: no 'email' column", path.display()))?;
    let mut seen = HashSet::new();
    for row in rdr.records() {
        let row = row.with_context(|| format!("read {}", path.display()))?;
        if let Some(email) = row.get(column) {
            seen.insert(email.trim().to_lowercase());
        }
    }
    Ok(seen)
}

#[cfg(not(feature = "with-csv"))]
fn emails_in_csv(_: &Path) -> Result<HashSet<String>> {
    bail!("reprise csv : feature 'with-csv' requise")
}

#[cfg(feature = "with-serde")]
fn emails_in_ndjson(path: &Path) -> Result<HashSet<String>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut seen = HashSet::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
        if let Some(email) = value.get("email").and_then(serde_json::Value::as_str) {
            seen.insert(email.trim().to_lowercase());
        }
    }
    Ok(seen)
}

#[cfg(not(feature = "with-serde"))]
fn emails_in_ndjson(_: &Path) -> Result<HashSet<String>> {
    bail!("reprise ndjson : feature 'with-serde' requise")
}
