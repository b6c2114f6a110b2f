use std::io::Read;
use std::path::PathBuf;

use crate::errors::{BindingError, PersistError};
use crate::notice::Notice;
use crate::state::RunSnapshot;
use crate::types::{BoundValue, Interruption, ParameterValue, Permission, Principal, RawEntry};

/// Supplies the principal behind the current request and its permissions.
///
/// Implementations must answer from live state: gates call these on every
/// vote and cancel and never cache the result.
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;

    fn has_permission(&self, principal: &Principal, record_id: &str, permission: Permission)
        -> bool;
}

/// Entry points of the engine that owns the paused branch.
///
/// Each settled gate calls exactly one of these, exactly once.
pub trait ExecutionEngine: Send + Sync {
    fn resume(&self, gate_id: &str, value: Option<BoundValue>);
    fn fail(&self, gate_id: &str, interruption: Interruption);
}

/// Pause-period markers on the paused graph node.
pub trait PauseMarker: Send + Sync {
    fn begin_pause(&self, label: &str) -> Result<(), PersistError>;
    fn end_pause(&self) -> Result<(), PersistError>;
}

/// Receives human-readable notices for the execution's output stream.
pub trait ConsoleSink: Send + Sync {
    fn emit(&self, notice: &Notice);
}

/// Persists the owning execution record.
pub trait RecordStore: Send + Sync {
    fn save(&self, snapshot: &RunSnapshot) -> Result<(), PersistError>;
}

/// Storage scoped to one execution record for uploaded parameter content.
pub trait ArtifactStore {
    /// Stream `content` into storage keyed by `name`, returning where it landed.
    fn store_artifact(&self, name: &str, content: &mut dyn Read) -> Result<PathBuf, PersistError>;
}

/// A parameter definition that can materialize a typed value from a raw entry.
pub trait ParameterDefinition {
    fn name(&self) -> &str;

    /// `Ok(None)` means the definition declined to produce a value.
    fn create_value(&self, entry: &RawEntry) -> Result<Option<ParameterValue>, BindingError>;
}
