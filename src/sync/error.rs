use crate::model::task::{MutationKind, ProjectId, TaskId, ValidationError};
use crate::model::tree::TreeError;
use crate::transport::TransportError;

/// Why a snapshot could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("snapshot is malformed: {0}")]
    Malformed(#[from] TreeError),
}

/// Error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Tree(TreeError),
    #[error("could not load project {project}: {source}")]
    Load {
        project: ProjectId,
        #[source]
        source: LoadFailure,
    },
    #[error("{kind} on task {target} was not confirmed: {source}")]
    Transport {
        target: TaskId,
        kind: MutationKind,
        #[source]
        source: TransportError,
    },
    #[error("could not subscribe to pushes for project {project}: {source}")]
    Push {
        project: ProjectId,
        #[source]
        source: TransportError,
    },
    #[error("stale data for task {id}: version {incoming} is not newer than {held}")]
    StaleVersion { id: TaskId, incoming: u64, held: u64 },
}

impl From<TreeError> for SyncError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Tree(other),
        }
    }
}

impl SyncError {
    /// The field a validation error names, if this is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SyncError::Validation(v) => Some(v.field),
            _ => None,
        }
    }
}
