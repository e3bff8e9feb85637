//! Typed event subscriptions
//!
//! Every Room, Peer and Media owns its own [`EventRegistry`]. Listeners are
//! called synchronously, in subscription order, on the control context that
//! applied the change. There is no global bus.

use std::fmt;

use super::state::ConnectionState;

/// Handle returned by [`EventRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Box<dyn FnMut(&E) + Send>;

pub struct EventRegistry<E> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<E>)>,
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Room-scoped events
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    Joined {
        own_peer_id: u64,
    },
    Left {
        reason: String,
    },
    RoomUserDataChanged {
        user_data: Vec<u8>,
    },
    PeerJoined {
        peer_id: u64,
        user_id: String,
        user_data: Vec<u8>,
    },
    PeerLeft {
        peer_id: u64,
    },
    PeerUserDataChanged {
        peer_id: u64,
        user_data: Vec<u8>,
    },
    MediaStarted {
        peer_id: u64,
        media_id: u64,
    },
    MediaStopped {
        peer_id: u64,
        media_id: u64,
    },
    MediaActivityChanged {
        peer_id: u64,
        media_id: u64,
        active: bool,
    },
    MessageReceived {
        sender_peer_id: u64,
        message: Vec<u8>,
    },
}

/// Peer-scoped events
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    UserDataChanged { user_data: Vec<u8> },
    MediaStarted { media_id: u64 },
    MediaStopped { media_id: u64 },
    MediaActivityChanged { media_id: u64, active: bool },
    MessageReceived { message: Vec<u8> },
}

/// Media-scoped events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    ActivityChanged { active: bool },
    Paused,
    Resumed,
    Stopped,
}
