use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use pausegate_core::errors::PersistError;
use pausegate_core::state::RunSnapshot;
use pausegate_core::traits::RecordStore;

use super::atomic::{atomic_write, AdvisoryLock};

/// Files belonging to one run, derived from its `<name>.run.json` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub run: PathBuf,
    pub journal: PathBuf,
    pub artifacts: PathBuf,
}

impl RunPaths {
    pub fn for_run(run: &Path) -> Self {
        let name = run
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.strip_suffix(".run.json").unwrap_or(&name);
        Self {
            run: run.to_path_buf(),
            journal: run.with_file_name(format!("{stem}.journal.jsonl")),
            artifacts: run.with_file_name(format!("{stem}.artifacts")),
        }
    }
}

pub fn load_snapshot(path: &Path) -> Result<RunSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read run {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid run file {}", path.display()))
}

/// Locked writer for one run file: lock, load, mutate, atomic write,
/// unlock on drop.
pub struct RunWriter {
    paths: RunPaths,
    _lock: AdvisoryLock,
}

impl RunWriter {
    pub fn acquire(run: &Path) -> Result<Self> {
        let lock = AdvisoryLock::acquire(run)
            .with_context(|| format!("cannot lock run {}", run.display()))?;
        Ok(Self {
            paths: RunPaths::for_run(run),
            _lock: lock,
        })
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn load(&self) -> Result<RunSnapshot> {
        load_snapshot(&self.paths.run)
    }

    /// Load the run, or start a fresh one when no file exists yet.
    pub fn load_or_new(&self, id: &str, url: &str) -> Result<RunSnapshot> {
        if self.paths.run.exists() {
            self.load()
        } else {
            Ok(RunSnapshot::new(id, url))
        }
    }

    pub fn write(&self, snapshot: &RunSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        atomic_write(&self.paths.run, json.as_bytes())
    }
}

impl RecordStore for RunWriter {
    fn save(&self, snapshot: &RunSnapshot) -> Result<(), PersistError> {
        Ok(self.write(snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_follow_the_run_name() {
        let paths = RunPaths::for_run(Path::new("/tmp/runs/deploy-42.run.json"));
        assert_eq!(paths.journal, Path::new("/tmp/runs/deploy-42.journal.jsonl"));
        assert_eq!(paths.artifacts, Path::new("/tmp/runs/deploy-42.artifacts"));
    }

    #[test]
    fn writer_round_trips_and_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.run.json");
        let writer = RunWriter::acquire(&path).unwrap();

        let mut snapshot = writer.load_or_new("deploy#1", "job/deploy/1/").unwrap();
        assert!(snapshot.pending.is_empty());
        snapshot.approvers.push("alice".into());
        writer.save(&snapshot).unwrap();

        assert!(RunWriter::acquire(&path).is_err());
        drop(writer);

        let reread = RunWriter::acquire(&path).unwrap().load().unwrap();
        assert_eq!(reread.id, "deploy#1");
        assert_eq!(reread.approvers, vec!["alice".to_string()]);
    }

    #[test]
    fn corrupt_run_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.run.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_snapshot(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid run file"));
    }
}
