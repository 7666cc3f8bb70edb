use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Confirmed, PushEvent, PushSource, Snapshot, Transport, TransportError, WireTask};
use crate::model::task::{NewTask, ProjectId, TaskChange, TaskId, TaskNode};
use crate::model::tree::{TaskTree, TreeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    FetchSnapshot,
    SubmitMutation,
    CreateNode,
    DeleteNode,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Endpoint::FetchSnapshot => "GET /tasks/tree",
            Endpoint::SubmitMutation => "PUT /tasks/{id}",
            Endpoint::CreateNode => "POST /tasks",
            Endpoint::DeleteNode => "DELETE /tasks/{id}",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub endpoint: Endpoint,
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Default)]
struct Server {
    project_id: ProjectId,
    tree: TaskTree,
    clock: u64,
    next_id: i64,
    failures: HashMap<Endpoint, usize>,
    delays: HashMap<Endpoint, usize>,
    calls: Vec<CallRecord>,
    subscribers: Vec<UnboundedSender<PushEvent>>,
}

impl Server {
    fn stamp(&mut self, id: TaskId) -> Result<TaskNode, TreeError> {
        self.clock += 1;
        let mut node = self.tree.find(id)?.clone();
        node.version = self.clock;
        self.tree.overwrite(id, &node)?;
        Ok(node)
    }

    fn broadcast(&mut self, event: PushEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn rejected(endpoint: Endpoint, err: TreeError) -> TransportError {
    let status = match err {
        TreeError::NotFound(_) => 404,
        TreeError::Validation(_) => 422,
        TreeError::InvalidParent { .. } | TreeError::DuplicateId(_) => 409,
    };
    TransportError::Rejected {
        endpoint: endpoint.to_string(),
        status,
        message: err.to_string(),
    }
}

/// In-process authoritative store for one project.
///
/// Behaves like the task service: assigns ids, stamps versions from a
/// single clock, validates writes and fans every change out to push
/// subscribers. Failures and extra latency can be scripted per endpoint.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    server: RefCell<Server>,
}

impl MemoryTransport {
    pub fn new(project_id: ProjectId) -> Self {
        MemoryTransport {
            server: RefCell::new(Server {
                project_id,
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, TreeError> {
        let project_id = snapshot.project_id;
        let version = snapshot.version;
        let tree = snapshot.into_tree()?;
        let clock = tree.nodes().map(|n| n.version).max().unwrap_or(0).max(version);
        let next_id = tree.nodes().map(|n| n.id.0).max().unwrap_or(0).max(0) + 1;
        Ok(MemoryTransport {
            server: RefCell::new(Server {
                project_id,
                tree,
                clock,
                next_id,
                ..Default::default()
            }),
        })
    }

    pub fn project_id(&self) -> ProjectId {
        self.server.borrow().project_id
    }

    /// Make the next call to `endpoint` fail. Stacks.
    pub fn fail_next(&self, endpoint: Endpoint) {
        *self.server.borrow_mut().failures.entry(endpoint).or_insert(0) += 1;
    }

    /// Add `yields` scheduler yields to the next call to `endpoint`.
    pub fn delay_next(&self, endpoint: Endpoint, yields: usize) {
        self.server.borrow_mut().delays.insert(endpoint, yields);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.server.borrow().calls.clone()
    }

    pub fn task(&self, id: TaskId) -> Option<TaskNode> {
        self.server.borrow().tree.get(id).cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        let server = self.server.borrow();
        Snapshot::from_tree(server.project_id, server.clock, &server.tree)
    }

    /// Send an event to every push subscriber, as if another client had
    /// made the change.
    pub fn broadcast(&self, event: PushEvent) {
        self.server.borrow_mut().broadcast(event);
    }

    /// Record the call, wait out its latency, then decide whether it fails.
    async fn enter(&self, endpoint: Endpoint, task_id: Option<TaskId>) -> Result<(), TransportError> {
        let (fail, yields) = {
            let mut server = self.server.borrow_mut();
            server.calls.push(CallRecord { endpoint, task_id });
            let fail = match server.failures.get_mut(&endpoint) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            let yields = server.delays.remove(&endpoint).unwrap_or(0);
            (fail, yields)
        };
        for _ in 0..=yields {
            tokio::task::yield_now().await;
        }
        if fail {
            return Err(TransportError::Request {
                endpoint: endpoint.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    async fn fetch_snapshot(&self, project: ProjectId) -> Result<Snapshot, TransportError> {
        self.enter(Endpoint::FetchSnapshot, None).await?;
        let snapshot = self.snapshot();
        if snapshot.project_id != project {
            return Err(TransportError::Rejected {
                endpoint: Endpoint::FetchSnapshot.to_string(),
                status: 404,
                message: format!("project not found: {}", project),
            });
        }
        Ok(snapshot)
    }

    async fn submit_mutation(
        &self,
        id: TaskId,
        change: &TaskChange,
    ) -> Result<Confirmed, TransportError> {
        self.enter(Endpoint::SubmitMutation, Some(id)).await?;
        let mut server = self.server.borrow_mut();
        let endpoint = Endpoint::SubmitMutation;
        server.tree.update(id, change).map_err(|e| rejected(endpoint, e))?;
        let node = server.stamp(id).map_err(|e| rejected(endpoint, e))?;
        let version = node.version;
        server.broadcast(PushEvent::TaskUpdated {
            task: WireTask::from_node(&node),
            version,
        });
        Ok(Confirmed { node, version })
    }

    async fn create_node(&self, parent: TaskId, fields: &NewTask) -> Result<TaskNode, TransportError> {
        self.enter(Endpoint::CreateNode, Some(parent)).await?;
        let mut server = self.server.borrow_mut();
        let endpoint = Endpoint::CreateNode;
        let project_id = server.tree.find(parent).map_err(|e| rejected(endpoint, e))?.project_id;
        let id = TaskId(server.next_id);
        let node = fields
            .to_node(id, project_id)
            .map_err(|e| rejected(endpoint, e.into()))?;
        server.tree.insert(node, Some(parent)).map_err(|e| rejected(endpoint, e))?;
        server.next_id += 1;
        let node = server.stamp(id).map_err(|e| rejected(endpoint, e))?;
        let version = node.version;
        server.broadcast(PushEvent::TaskCreated {
            task: WireTask::from_node(&node),
            version,
        });
        Ok(node)
    }

    async fn delete_node(&self, id: TaskId) -> Result<(), TransportError> {
        self.enter(Endpoint::DeleteNode, Some(id)).await?;
        let mut server = self.server.borrow_mut();
        server
            .tree
            .remove(id)
            .map_err(|e| rejected(Endpoint::DeleteNode, e))?;
        server.clock += 1;
        let event = PushEvent::TaskDeleted {
            task_id: id,
            project_id: server.project_id,
            version: server.clock,
        };
        server.broadcast(event);
        Ok(())
    }
}

impl PushSource for MemoryTransport {
    fn subscribe_push(
        &self,
        project: ProjectId,
    ) -> Result<UnboundedReceiver<PushEvent>, TransportError> {
        let mut server = self.server.borrow_mut();
        if server.project_id != project {
            return Err(TransportError::Rejected {
                endpoint: format!("/ws/projects/{}", project),
                status: 404,
                message: "project not found".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        server.subscribers.push(tx);
        Ok(rx)
    }
}
