//! The remote side of synchronization: request/response calls, the push
//! channel, and the JSON shapes both use.

pub mod memory;
pub mod push;
pub mod wire;

pub use memory::{CallRecord, Endpoint, MemoryTransport};
pub use push::{ConnectionState, PushConnection};
pub use wire::{PushEvent, Snapshot, WireTask};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::model::task::{NewTask, ProjectId, TaskChange, TaskId, TaskNode};

/// Error type for remote calls. Cloneable so failures can ride along on
/// change events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("{endpoint} rejected with status {status}: {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
    #[error("push channel disconnected")]
    Disconnected,
}

/// Server acknowledgement of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    /// The node as normalized by the server
    pub node: TaskNode,
    pub version: u64,
}

/// Request/response calls against the task service.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn fetch_snapshot(&self, project: ProjectId) -> Result<Snapshot, TransportError>;

    async fn submit_mutation(
        &self,
        id: TaskId,
        change: &TaskChange,
    ) -> Result<Confirmed, TransportError>;

    /// Create a child under `parent`. Returns the node with its server id.
    async fn create_node(&self, parent: TaskId, fields: &NewTask) -> Result<TaskNode, TransportError>;

    async fn delete_node(&self, id: TaskId) -> Result<(), TransportError>;
}

/// Anything that can open a push stream for a project.
pub trait PushSource {
    fn subscribe_push(
        &self,
        project: ProjectId,
    ) -> Result<UnboundedReceiver<PushEvent>, TransportError>;
}
