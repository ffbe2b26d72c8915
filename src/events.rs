use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Manual,
    DeadlineReached,
}

/// Things other parts of the bot may want to react to after a poll changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Created { poll_id: String },
    Edited { poll_id: String, had_votes: bool },
    Completed { poll_id: String, reason: CloseReason },
    Reopened { poll_id: String },
    VotesReset { poll_id: String, user_id: Option<String>, removed: u64 },
}

impl PollEvent {
    pub fn poll_id(&self) -> &str {
        match self {
            PollEvent::Created { poll_id }
            | PollEvent::Edited { poll_id, .. }
            | PollEvent::Completed { poll_id, .. }
            | PollEvent::Reopened { poll_id }
            | PollEvent::VotesReset { poll_id, .. } => poll_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: UnboundedSender<PollEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, UnboundedReceiver<PollEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publishing never fails the caller; with no listener the event is dropped.
    pub fn publish(&self, event: PollEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No listener for poll event {:?}", e.0);
        }
    }
}
