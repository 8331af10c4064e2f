//! Écriture du rapport au fil de l'eau (csv, ndjson), dans l'ordre
//! d'achèvement, avec vidage périodique sur disque.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mailprobe::ValidationRecord;
use tracing::debug;

use crate::args::Format;

enum Rows {
    #[cfg(feature = "with-csv")]
    Csv(csv::Writer<File>),
    Ndjson(BufWriter<File>),
}

pub struct RecordSink {
    path: PathBuf,
    rows: Rows,
    flush_every: u64,
    pending: u64,
    written: u64,
    error: Option<anyhow::Error>,
}

impl RecordSink {
    /// Ouvre `path` en ajout (`append`) ou en le remplaçant. L'en-tête csv
    /// n'est écrit que dans un fichier vide.
    pub fn open(path: &Path, format: Format, append: bool, flush_every: u64) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        let empty = file.metadata()?.len() == 0;
        let rows = rows_for(file, format, empty)?;
        Ok(Self {
            path: path.to_path_buf(),
            rows,
            flush_every: flush_every.max(1),
            pending: 0,
            written: 0,
            error: None,
        })
    }

    /// Après une première erreur d'écriture, les enregistrements suivants
    /// sont ignorés ; l'erreur ressort de [`finish`](Self::finish).
    pub fn push(&mut self, record: &ValidationRecord) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.write(record) {
            self.error = Some(err);
        }
    }

    fn write(&mut self, record: &ValidationRecord) -> Result<()> {
        match &mut self.rows {
            #[cfg(feature = "with-csv")]
            Rows::Csv(wtr) => wtr.write_record(crate::output::csv_record(record))?,
            Rows::Ndjson(out) => {
                serde_json::to_writer(&mut *out, record)?;
                out.write_all(b"\n")?;
            }
        }
        self.written += 1;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.rows {
            #[cfg(feature = "with-csv")]
            Rows::Csv(wtr) => wtr.flush(),
            Rows::Ndjson(out) => out.flush(),
        }
        .with_context(|| format!("flush {}", self.path.display()))?;
        debug!(path = %self.path.display(), rows = self.pending, "report flushed");
        self.pending = 0;
        Ok(())
    }

    /// Vide le reste et renvoie le nombre d'enregistrements écrits.
    pub fn finish(mut self) -> Result<u64> {
        if let Some(err) = self.error.take() {
            return Err(err.context(format!("write {}", self.path.display())));
        }
        self.flush()?;
        Ok(self.written)
    }
}

fn rows_for(file: File, format: Format, empty: bool) -> Result<Rows> {
    match format {
        #[cfg(feature = "with-csv")]
        Format::Csv => {
            let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
            if empty {
                wtr.write_record(crate::output::CSV_HEADER)?;
            }
            Ok(Rows::Csv(wtr))
        }
        Format::Ndjson => {
            let _ = empty;
            Ok(Rows::Ndjson(BufWriter::new(file)))
        }
        other => bail!("format={other:?} ne s'écrit pas au fil de l'eau (csv nécessite 'with-csv')"),
    }
}

/// Formats écrits ligne à ligne.
pub fn streams(format: Format) -> bool {
    matches!(format, Format::Csv | Format::Ndjson)
}
