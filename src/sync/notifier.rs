use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::model::task::{MutationKind, ProjectId, TaskId};
use crate::transport::TransportError;

/// What caused a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCause {
    /// A snapshot replaced the tree
    Loaded { project: ProjectId },
    /// A local mutation was applied optimistically
    Applied {
        seq: u64,
        target: TaskId,
        kind: MutationKind,
    },
    /// The server confirmed a local mutation
    Confirmed {
        seq: u64,
        target: TaskId,
        kind: MutationKind,
    },
    /// A created node received its server id
    IdAssigned {
        seq: u64,
        temporary: TaskId,
        id: TaskId,
    },
    /// A local mutation failed and was undone
    RolledBack {
        seq: u64,
        target: TaskId,
        kind: MutationKind,
    },
    /// A push event changed the tree
    Remote { target: TaskId },
    /// The session was torn down
    Cleared,
}

/// A mutation the server refused or never answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub seq: u64,
    pub target: TaskId,
    pub kind: MutationKind,
    pub error: TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Tree revision after the change
    pub revision: u64,
    pub cause: ChangeCause,
    pub failure: Option<MutationFailure>,
}

pub type HandlerResult = Result<(), Box<dyn std::error::Error>>;

type Handler = Rc<RefCell<dyn FnMut(&ChangeEvent) -> HandlerResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Synchronous fan-out of change events to subscribers.
///
/// Handlers run in subscription order. A handler that errors or panics is
/// logged and skipped; the rest still run.
#[derive(Default)]
pub struct ChangeNotifier {
    next_token: Cell<u64>,
    handlers: RefCell<Vec<(SubscriptionToken, Handler)>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: FnMut(&ChangeEvent) -> HandlerResult + 'static,
    {
        let token = SubscriptionToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        let handler: Handler = Rc::new(RefCell::new(handler));
        self.handlers.borrow_mut().push((token, handler));
        token
    }

    /// Returns false if the token was not subscribed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    /// Deliver `event` to every current subscriber. Returns how many
    /// handlers failed.
    pub fn emit(&self, event: &ChangeEvent) -> usize {
        // Snapshot so handlers can (un)subscribe while we iterate
        let current: Vec<(SubscriptionToken, Handler)> = self.handlers.borrow().clone();
        let mut failures = 0;
        for (token, handler) in current {
            let Ok(mut call) = handler.try_borrow_mut() else {
                tracing::warn!(?token, "change handler is already running, skipping nested event");
                failures += 1;
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| (&mut *call)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(?token, error = %err, "change handler failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(?token, "change handler panicked");
                }
            }
        }
        failures
    }
}
