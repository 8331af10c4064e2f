//! Listes cumulées de domaines et d'adresses vérifiées, un élément par
//! ligne, triées. Les fichiers existants sont complétés, jamais vidés.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use mailprobe::ValidationRecord;
use tracing::info;

pub const VALID_DOMAINS: &str = "valid_domains.txt";
pub const CATCHALL_DOMAINS: &str = "catchall_domains.txt";
pub const NOT_CATCHALL_DOMAINS: &str = "not_catchall_domains.txt";
pub const VERIFIED_EMAILS: &str = "verified_emails.txt";

#[derive(Debug, Default)]
struct Lists {
    valid_domains: BTreeSet<String>,
    catchall_domains: BTreeSet<String>,
    not_catchall_domains: BTreeSet<String>,
    verified_emails: BTreeSet<String>,
}

impl Lists {
    fn add(&mut self, record: &ValidationRecord) {
        let Some((_, domain)) = record.email.rsplit_once('@') else {
            return;
        };
        if !record.is_syntax_valid {
            return;
        }
        let domain = domain.to_lowercase();
        if record.has_mx {
            self.valid_domains.insert(domain.clone());
            if record.is_catchall {
                self.catchall_domains.insert(domain);
            } else {
                self.not_catchall_domains.insert(domain);
            }
        }
        if record.is_deliverable {
            self.verified_emails.insert(record.email.clone());
        }
    }

    fn files(&mut self) -> [(&'static str, &mut BTreeSet<String>); 4] {
        [
            (VALID_DOMAINS, &mut self.valid_domains),
            (CATCHALL_DOMAINS, &mut self.catchall_domains),
            (NOT_CATCHALL_DOMAINS, &mut self.not_catchall_domains),
            (VERIFIED_EMAILS, &mut self.verified_emails),
        ]
    }
}

/// Fusionne `records` dans les quatre listes de `dir`.
pub fn update(dir: &Path, records: &[ValidationRecord]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut lists = Lists::default();
    for (name, entries) in lists.files() {
        let path = dir.join(name);
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            entries.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from),
            );
        }
    }
    for record in records {
        lists.add(record);
    }
    for (name, entries) in lists.files() {
        let path = dir.join(name);
        let mut body = entries.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    }
    info!(
        dir = %dir.display(),
        valid_domains = lists.valid_domains.len(),
        catchall_domains = lists.catchall_domains.len(),
        verified_emails = lists.verified_emails.len(),
        "domain lists updated"
    );
    Ok(())
}
