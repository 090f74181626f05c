//! Client session contracts consumed by the object core

mod hooks;
mod message;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use hooks::{NoopHooks, ZoneInHooks};
pub use message::{SelectCharacter, SELECT_CHARACTER_OPCODE};

/// Opaque handle to a connected client
pub trait Session: Send + Sync + fmt::Debug {
    fn id(&self) -> Uuid;

    /// Queue bytes for the client
    fn write(&self, data: Bytes) -> Result<()>;

    /// Close the connection. Closing twice is harmless.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// What the network side of a [`ChannelSession`] receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Data(Bytes),
    Closed,
}

/// Session backed by an mpsc channel drained by the connection task
#[derive(Debug)]
pub struct ChannelSession {
    id: Uuid,
    sender: mpsc::UnboundedSender<SessionEvent>,
    closed: AtomicBool,
}

impl ChannelSession {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::new_v4(),
            sender,
            closed: AtomicBool::new(false),
        };
        (session, receiver)
    }
}

impl Session for ChannelSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn write(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            bail!("session {} is closed", self.id);
        }
        if self.sender.send(SessionEvent::Data(data)).is_err() {
            bail!("session {} connection dropped", self.id);
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(SessionEvent::Closed);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
