use std::task::{Context, Poll};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use super::{PushEvent, PushSource, TransportError};
use crate::model::task::ProjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected { project: ProjectId },
}

/// An explicit push subscription. Connecting to a new project drops the
/// previous stream first.
#[derive(Debug)]
pub struct PushConnection {
    state: ConnectionState,
    receiver: Option<UnboundedReceiver<PushEvent>>,
}

impl Default for PushConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl PushConnection {
    pub fn new() -> Self {
        PushConnection {
            state: ConnectionState::Disconnected,
            receiver: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    pub fn connect<S: PushSource + ?Sized>(
        &mut self,
        source: &S,
        project: ProjectId,
    ) -> Result<(), TransportError> {
        self.disconnect();
        let receiver = source.subscribe_push(project)?;
        self.receiver = Some(receiver);
        self.state = ConnectionState::Connected { project };
        tracing::debug!(project, "push channel connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            tracing::debug!("push channel disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Next queued event without waiting.
    pub fn try_next(&mut self) -> Option<PushEvent> {
        let receiver = self.receiver.as_mut()?;
        match receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.mark_closed();
                None
            }
        }
    }

    /// Poll for the next event. `Ready(None)` once the channel is closed or
    /// was never opened.
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<PushEvent>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(None);
        };
        match receiver.poll_recv(cx) {
            Poll::Ready(None) => {
                self.mark_closed();
                Poll::Ready(None)
            }
            other => other,
        }
    }

    fn mark_closed(&mut self) {
        self.receiver = None;
        self.state = ConnectionState::Disconnected;
        tracing::warn!("push channel closed by the server");
    }
}
