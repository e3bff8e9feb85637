//! Media: one directional audio stream owned by a peer

use crate::protocol::Value;

use super::events::{EventRegistry, MediaEvent, SubscriptionId};

#[derive(Debug)]
pub struct Media {
    id: u64,
    peer_id: u64,
    remote: bool,
    active: bool,
    paused: bool,
    properties: Value,
    events: EventRegistry<MediaEvent>,
}

impl Media {
    pub(crate) fn new(id: u64, peer_id: u64, remote: bool, properties: Value) -> Self {
        Self {
            id,
            peer_id,
            remote,
            active: false,
            paused: false,
            properties,
            events: EventRegistry::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Currently sending (local) or receiving (remote) audio
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn properties(&self) -> &Value {
        &self.properties
    }

    pub fn on<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&MediaEvent) + Send + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Returns true if the flag changed
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        if self.active == active {
            return false;
        }
        self.active = active;
        self.events.emit(&MediaEvent::ActivityChanged { active });
        true
    }

    pub(crate) fn set_paused(&mut self, paused: bool) -> bool {
        if self.paused == paused {
            return false;
        }
        self.paused = paused;
        self.events.emit(if paused {
            &MediaEvent::Paused
        } else {
            &MediaEvent::Resumed
        });
        true
    }

    pub(crate) fn stopped(mut self) {
        self.events.emit(&MediaEvent::Stopped);
    }
}
