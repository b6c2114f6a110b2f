//! Per-run bookkeeping: the pending-gate registry and the execution record
//! that owns it.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use pausegate_core::errors::{GateError, PersistError};
use pausegate_core::state::{PendingGate, RunSnapshot, SettledGate};
use pausegate_core::traits::{ArtifactStore, RecordStore};

use crate::gate::{Collaborators, PauseGate};

/// URL segment under a run where its pending inputs are served.
pub const URL_NAME: &str = "input";

/// Pending gates of one run, in creation order. Ids are unique.
#[derive(Default)]
pub struct PauseRegistry {
    gates: Vec<Arc<PauseGate>>,
}

impl PauseRegistry {
    pub fn add(&mut self, gate: Arc<PauseGate>) -> Result<(), GateError> {
        if self.get(gate.id()).is_some() {
            return Err(GateError::DuplicateGate(gate.id().to_string()));
        }
        self.gates.push(gate);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<PauseGate>> {
        let index = self.gates.iter().position(|g| g.id() == id)?;
        Some(self.gates.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PauseGate>> {
        self.gates.iter().find(|g| g.id() == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.gates.iter().map(|g| g.id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PauseGate>> {
        self.gates.iter()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

/// One execution record.
///
/// Holds the registry (created on first use), the approvers recorded on the
/// run, and the history of settled gates. Each piece has its own lock and
/// no method holds two of them at once.
pub struct RunRecord {
    id: String,
    url: String,
    artifact_dir: PathBuf,
    store: Arc<dyn RecordStore>,
    registry: Mutex<Option<PauseRegistry>>,
    approvers: Mutex<Vec<String>>,
    history: Mutex<Vec<SettledGate>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunRecord {
    /// `url` is the run's console path relative to the server root, such as
    /// `job/deploy/42/`. A trailing slash is added when missing.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        artifact_dir: impl Into<PathBuf>,
        store: Arc<dyn RecordStore>,
    ) -> Arc<Self> {
        let mut url = url.into();
        if !url.is_empty() && !url.ends_with('/') {
            url.push('/');
        }
        Arc::new(Self {
            id: id.into(),
            url,
            artifact_dir: artifact_dir.into(),
            store,
            registry: Mutex::new(None),
            approvers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Rebuild a run from its snapshot, reattaching pending gates.
    ///
    /// `collaborators` supplies the services for each restored gate, keyed
    /// by gate id. Restored gates are not announced again.
    pub fn restore<F>(
        snapshot: RunSnapshot,
        artifact_dir: impl Into<PathBuf>,
        store: Arc<dyn RecordStore>,
        mut collaborators: F,
    ) -> Result<Arc<Self>, GateError>
    where
        F: FnMut(&PendingGate) -> Collaborators,
    {
        let run = Self::new(snapshot.id, snapshot.url, artifact_dir, store);
        *lock(&run.approvers) = snapshot.approvers;
        *lock(&run.history) = snapshot.history;
        for pending in snapshot.pending {
            let collab = collaborators(&pending);
            let gate = PauseGate::restore(pending, &run, collab)?;
            run.add_gate(gate)?;
        }
        Ok(run)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn add_gate(&self, gate: Arc<PauseGate>) -> Result<(), GateError> {
        lock(&self.registry)
            .get_or_insert_with(PauseRegistry::default)
            .add(gate)
    }

    pub fn remove_gate(&self, id: &str) -> Option<Arc<PauseGate>> {
        lock(&self.registry).as_mut()?.remove(id)
    }

    pub fn gate(&self, id: &str) -> Option<Arc<PauseGate>> {
        lock(&self.registry).as_ref()?.get(id).cloned()
    }

    /// Pending gates in creation order.
    pub fn pending(&self) -> Vec<Arc<PauseGate>> {
        lock(&self.registry)
            .as_ref()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_approver(&self, name: &str) {
        lock(&self.approvers).push(name.to_string());
    }

    pub fn approvers(&self) -> Vec<String> {
        lock(&self.approvers).clone()
    }

    pub fn record_settled(&self, settled: SettledGate) {
        lock(&self.history).push(settled);
    }

    pub fn history(&self) -> Vec<SettledGate> {
        lock(&self.history).clone()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let approvers = self.approvers();
        let history = self.history();
        let pending = self
            .pending()
            .iter()
            .filter_map(|g| g.pending_snapshot())
            .collect();
        RunSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            approvers,
            pending,
            history,
            updated_at: Utc::now(),
        }
    }

    pub fn save(&self) -> Result<(), PersistError> {
        self.store.save(&self.snapshot())
    }
}

impl ArtifactStore for RunRecord {
    fn store_artifact(&self, name: &str, content: &mut dyn Read) -> Result<PathBuf, PersistError> {
        let mut parts = Path::new(name).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            return Err(PersistError::Other(format!(
                "'{name}' is not a plain file name"
            )));
        }
        std::fs::create_dir_all(&self.artifact_dir)?;
        let target = self.artifact_dir.join(name);
        let mut out = File::create(&target)?;
        std::io::copy(content, &mut out)?;
        Ok(target)
    }
}
