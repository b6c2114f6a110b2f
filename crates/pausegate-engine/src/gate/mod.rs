pub mod binder;
pub mod ledger;
pub mod pause;
pub mod policy;

use std::sync::Arc;

use pausegate_core::traits::{ConsoleSink, ExecutionEngine, IdentityProvider, PauseMarker};

pub use ledger::{Approval, ApprovalLedger};
pub use pause::PauseGate;
pub use policy::AuthorizationPolicy;

/// Host services a gate talks to. Cloned into every gate of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ExecutionEngine>,
    pub identity: Arc<dyn IdentityProvider>,
    pub console: Arc<dyn ConsoleSink>,
    /// Graph node carrying the pause markers, if the host tracks one.
    pub node: Option<Arc<dyn PauseMarker>>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use pausegate_core::errors::PersistError;
    use pausegate_core::notice::Notice;
    use pausegate_core::spec::GateRequest;
    use pausegate_core::state::RunSnapshot;
    use pausegate_core::traits::{
        ConsoleSink, ExecutionEngine, IdentityProvider, PauseMarker, RecordStore,
    };
    use pausegate_core::types::{BoundValue, Interruption, Permission, Principal};

    use super::{Collaborators, PauseGate};
    use crate::registry::RunRecord;

    #[derive(Default)]
    pub struct RecordingEngine {
        resumes: Mutex<Vec<Option<BoundValue>>>,
        failures: Mutex<Vec<(Interruption, Option<String>)>>,
    }

    impl RecordingEngine {
        pub fn resumed(&self) -> usize {
            self.resumes.lock().unwrap().len()
        }

        pub fn failed(&self) -> usize {
            self.failures.lock().unwrap().len()
        }

        pub fn last_resume_value(&self) -> Option<Option<BoundValue>> {
            self.resumes.lock().unwrap().last().cloned()
        }

        pub fn last_failure(&self) -> Option<Interruption> {
            self.failures.lock().unwrap().last().map(|(i, _)| i.clone())
        }

        pub fn failure_thread(&self) -> Option<String> {
            self.failures.lock().unwrap().last().and_then(|(_, t)| t.clone())
        }
    }

    impl ExecutionEngine for RecordingEngine {
        fn resume(&self, _gate_id: &str, value: Option<BoundValue>) {
            self.resumes.lock().unwrap().push(value);
        }

        fn fail(&self, _gate_id: &str, interruption: Interruption) {
            let thread = std::thread::current().name().map(str::to_string);
            self.failures.lock().unwrap().push((interruption, thread));
        }
    }

    #[derive(Default)]
    pub struct Grants {
        cancel: Mutex<HashSet<String>>,
        pub current: Mutex<Option<Principal>>,
    }

    impl Grants {
        pub fn grant_cancel(&self, name: &str) {
            self.cancel.lock().unwrap().insert(name.to_string());
        }

        pub fn login(&self, principal: Principal) {
            *self.current.lock().unwrap() = Some(principal);
        }
    }

    impl IdentityProvider for Grants {
        fn current_principal(&self) -> Option<Principal> {
            self.current.lock().unwrap().clone()
        }

        fn has_permission(&self, principal: &Principal, _record_id: &str, p: Permission) -> bool {
            p == Permission::Cancel && self.cancel.lock().unwrap().contains(&principal.name)
        }
    }

    #[derive(Default)]
    pub struct CollectingConsole(Mutex<Vec<Notice>>);

    impl CollectingConsole {
        pub fn notices(&self) -> Vec<Notice> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ConsoleSink for CollectingConsole {
        fn emit(&self, notice: &Notice) {
            self.0.lock().unwrap().push(notice.clone());
        }
    }

    #[derive(Default)]
    pub struct CountingNode {
        pub begun: AtomicUsize,
        pub ended: AtomicUsize,
    }

    impl PauseMarker for CountingNode {
        fn begin_pause(&self, _label: &str) -> Result<(), PersistError> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn end_pause(&self) -> Result<(), PersistError> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct CountingStore {
        saves: AtomicUsize,
        broken: AtomicBool,
        pub last: Mutex<Option<RunSnapshot>>,
    }

    impl CountingStore {
        pub fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        pub fn fail_saves(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }
    }

    impl RecordStore for CountingStore {
        fn save(&self, snapshot: &RunSnapshot) -> Result<(), PersistError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(PersistError::Other("disk full".into()));
            }
            *self.last.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    /// A run at `job/app/7/` with recording collaborators.
    pub struct Harness {
        pub run: Arc<RunRecord>,
        pub engine: Arc<RecordingEngine>,
        pub identity: Arc<Grants>,
        pub console: Arc<CollectingConsole>,
        pub node: Arc<CountingNode>,
        pub store: Arc<CountingStore>,
        pub dir: tempfile::TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(CountingStore::default());
            let run = RunRecord::new(
                "app#7",
                "job/app/7/",
                dir.path().join("artifacts"),
                store.clone(),
            );
            Self {
                run,
                engine: Arc::new(RecordingEngine::default()),
                identity: Arc::new(Grants::default()),
                console: Arc::new(CollectingConsole::default()),
                node: Arc::new(CountingNode::default()),
                store,
                dir,
            }
        }

        pub fn collaborators(&self) -> Collaborators {
            Collaborators {
                engine: self.engine.clone(),
                identity: self.identity.clone(),
                console: self.console.clone(),
                node: Some(self.node.clone() as Arc<dyn PauseMarker>),
            }
        }

        pub fn open(&self, request: GateRequest) -> Arc<PauseGate> {
            let gate = PauseGate::new(request, &self.run, self.collaborators()).unwrap();
            gate.start().unwrap();
            gate
        }
    }
}
