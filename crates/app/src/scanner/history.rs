use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scan_core::Symbology;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scanner::lookup::ProductRecord;

/// One accepted scan, with whatever product data the lookup produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct HistoryEntry {
    pub(crate) time: DateTime<Utc>,
    pub(crate) code: String,
    pub(crate) symbology: Symbology,
    pub(crate) product: Option<ProductRecord>,
}

/// Append-only scan log. Grows in memory for the process lifetime and, when
/// configured, mirrors every entry as one JSON line to a flat file that
/// `scanlens history` can read back.
pub(crate) struct HistoryLog {
    entries: Vec<HistoryEntry>,
    sink: Option<File>,
    sink_failed: bool,
}

impl HistoryLog {
    pub(crate) fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            sink: None,
            sink_failed: false,
        }
    }

    pub(crate) fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open history file {}", path.display()))?;
        Ok(Self {
            entries: Vec::new(),
            sink: Some(file),
            sink_failed: false,
        })
    }

    /// Record an entry. File write failures are logged at the start of a
    /// failure streak and never interrupt scanning.
    pub(crate) fn append(&mut self, entry: HistoryEntry) {
        if let Some(file) = self.sink.as_mut() {
            let written = serde_json::to_string(&entry)
                .map_err(anyhow::Error::from)
                .and_then(|line| writeln!(file, "{line}").map_err(anyhow::Error::from));
            match written {
                Ok(()) => self.sink_failed = false,
                Err(err) => {
                    if !self.sink_failed {
                        warn!("failed to persist history entry: {err}");
                    }
                    self.sink_failed = true;
                }
            }
        }
        self.entries.push(entry);
    }

    pub(crate) fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Read a JSON-lines history file back, skipping malformed lines.
pub(crate) fn load(path: &Path) -> Result<Vec<HistoryEntry>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open history file {}", path.display()))?;
    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!("skipping malformed history line {}: {err}", number + 1),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn entry(code: &str) -> HistoryEntry {
        HistoryEntry {
            time: Utc::now(),
            code: code.to_string(),
            symbology: Symbology::Ean13,
            product: None,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("scanlens-{}-{}.jsonl", name, std::process::id()))
    }

    #[test]
    fn append_grows_by_one() {
        let mut log = HistoryLog::in_memory();
        assert_eq!(log.len(), 0);
        log.append(entry("012345678905"));
        assert_eq!(log.len(), 1);
        log.append(entry("5449000000996"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].code, "012345678905");
    }

    #[test]
    fn file_mirror_round_trips() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        {
            let mut log = HistoryLog::with_file(&path).expect("opens");
            log.append(entry("012345678905"));
            log.append(entry("5449000000996"));
        }
        let loaded = load(&path).expect("loads");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].code, "012345678905");
        assert_eq!(loaded[1].code, "5449000000996");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_skips_malformed_lines() {
        let path = temp_path("malformed");
        let line = serde_json::to_string(&entry("4006381333931")).unwrap();
        std::fs::write(&path, format!("{line}\nnot json\n\n{line}\n")).unwrap();
        let loaded = load(&path).expect("loads");
        assert_eq!(loaded.len(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
