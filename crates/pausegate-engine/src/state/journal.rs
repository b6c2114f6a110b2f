//! Hash-chained JSONL journal of a run's console output and pause markers.
//!
//! Each line carries `prev_hash`, the SHA-256 of the previous line, with
//! `"genesis"` for the first. Rewriting or dropping a line breaks the chain
//! from that point on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use pausegate_core::errors::PersistError;
use pausegate_core::notice::Notice;
use pausegate_core::traits::{ConsoleSink, PauseMarker};

const GENESIS: &str = "genesis";

fn line_hash(line: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(line.as_bytes()))
}

/// Append `entry` to the journal at `path`, returning the new line's hash.
pub fn append_entry(path: &Path, entry: &Value) -> Result<String> {
    let mut content = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read journal {}", path.display()))?
    } else {
        String::new()
    };

    let prev_hash = content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(line_hash)
        .unwrap_or_else(|| GENESIS.to_string());

    let mut entry = entry.clone();
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("prev_hash".into(), Value::String(prev_hash));
        obj.insert("ts".into(), Value::String(chrono::Utc::now().to_rfc3339()));
    }

    let line = serde_json::to_string(&entry)?;
    let hash = line_hash(&line);
    content.push_str(&line);
    content.push('\n');
    super::atomic::atomic_write(path, content.as_bytes())
        .with_context(|| format!("cannot write journal {}", path.display()))?;
    Ok(hash)
}

/// Verify the chain and return the number of entries.
pub fn verify_chain(path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read journal {}", path.display()))?;

    let mut count = 0u64;
    let mut prev_hash = GENESIS.to_string();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON at line {}", i + 1))?;
        let recorded = entry
            .get("prev_hash")
            .and_then(Value::as_str)
            .unwrap_or(GENESIS);
        if recorded != prev_hash {
            bail!("hash chain broken at entry {count}: expected prev_hash '{prev_hash}', got '{recorded}'");
        }
        prev_hash = line_hash(line);
        count += 1;
    }
    Ok(count)
}

/// Read every entry, in order.
pub fn read_entries(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read journal {}", path.display()))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid JSON at entry {i}"))
        })
        .collect()
}

/// One journal file shared by the console and pause writers of a run.
///
/// Appends are serialized in-process; cross-process writers are expected
/// to hold the run's advisory lock.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    guard: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &Value) -> Result<String> {
        let _serial = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        append_entry(&self.path, entry)
    }
}

/// Console sink that journals every notice and optionally echoes the
/// rendered text to stderr.
pub struct JournalConsole {
    journal: Arc<Journal>,
    echo: bool,
}

impl JournalConsole {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            echo: false,
        }
    }

    pub fn echo_to_stderr(mut self) -> Self {
        self.echo = true;
        self
    }
}

impl ConsoleSink for JournalConsole {
    fn emit(&self, notice: &Notice) {
        let text = notice.to_string();
        if self.echo {
            eprintln!("{text}");
        }
        let entry = json!({
            "event": "notice",
            "notice": notice,
            "text": text,
        });
        if let Err(e) = self.journal.append(&entry) {
            warn!(gate_id = %notice.gate_id(), error = %e, "cannot journal console notice");
        }
    }
}

/// Pause markers for one paused node, written to the run journal.
pub struct JournalPause {
    journal: Arc<Journal>,
    node: String,
}

impl JournalPause {
    pub fn new(journal: Arc<Journal>, node: impl Into<String>) -> Self {
        Self {
            journal,
            node: node.into(),
        }
    }
}

impl PauseMarker for JournalPause {
    fn begin_pause(&self, label: &str) -> Result<(), PersistError> {
        self.journal
            .append(&json!({"event": "pause_begin", "node": self.node, "label": label}))?;
        Ok(())
    }

    fn end_pause(&self) -> Result<(), PersistError> {
        self.journal
            .append(&json!({"event": "pause_end", "node": self.node}))?;
        Ok(())
    }
}
