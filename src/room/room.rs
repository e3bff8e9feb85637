//! Room state machine
//!
//! [`Room`] is a reducer over validated update records. It owns the whole
//! Peer/Media graph and is only mutated from the control context, so it takes
//! `&mut self` everywhere and holds no locks. Changes that need the codec
//! context come back to the caller as [`MediaEffect`]s.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::RoomError;
use crate::network::packet::MAX_MEDIA_ID;
use crate::protocol::Value;

use super::events::{EventRegistry, PeerEvent, RoomEvent, SubscriptionId};
use super::media::Media;
use super::peer::Peer;
use super::state::ConnectionState;
use super::update::{
    MediaSnapshot, MessageReceived, PeerSnapshot, PeerUpdate, RoomSnapshot, RoomUpdate,
};

/// Work the codec context has to do after a graph change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEffect {
    StartDecoder { media_id: u64 },
    StopDecoder { media_id: u64 },
    StopEncoder { media_id: u64 },
}

#[derive(Debug)]
pub struct Room {
    id: String,
    customer: String,
    user_data: Vec<u8>,
    own_peer: Peer,
    peers: HashMap<u64, Peer>,
    state: ConnectionState,
    /// Set by `Joined`, cleared when `Left` fires
    joined: bool,
    events: EventRegistry<RoomEvent>,
}

impl Room {
    pub fn new(id: impl Into<String>, own_user_id: impl Into<String>, own_user_data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            customer: String::new(),
            user_data: Vec::new(),
            own_peer: Peer::local(own_user_id.into(), own_user_data),
            peers: HashMap::new(),
            state: ConnectionState::Disconnected,
            joined: false,
            events: EventRegistry::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn own_peer(&self) -> &Peer {
        &self.own_peer
    }

    pub fn own_peer_mut(&mut self) -> &mut Peer {
        &mut self.own_peer
    }

    /// Remote peers
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer(&self, id: u64) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: u64) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn on<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&RoomEvent) + Send + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Find a media anywhere in the graph
    pub fn media(&self, media_id: u64) -> Option<&Media> {
        self.own_peer
            .media(media_id)
            .or_else(|| self.peers.values().find_map(|peer| peer.media(media_id)))
    }

    pub fn media_mut(&mut self, media_id: u64) -> Option<&mut Media> {
        if self.own_peer.media(media_id).is_some() {
            return self.own_peer.media_mut(media_id);
        }
        self.peers
            .values_mut()
            .find_map(|peer| peer.media_mut(media_id))
    }

    /// Fires `ConnectionStateChanged` when the state actually changes, and
    /// `Left` once per join cycle on reaching `Disconnected`
    pub fn set_connection_state(&mut self, new: ConnectionState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        debug!(room = %self.id, %old, %new, "room state changed");
        self.events
            .emit(&RoomEvent::ConnectionStateChanged { old, new });

        if new == ConnectionState::Disconnected && self.joined {
            self.joined = false;
            self.events.emit(&RoomEvent::Left {
                reason: String::new(),
            });
        }
    }

    /// Apply one `RoomUpdated` record.
    ///
    /// Until the first `Joined` only `Joined` and `Left` are applied; any
    /// other record is dropped since the local peer id is not known yet.
    pub fn apply_room_update(&mut self, update: RoomUpdate) -> Vec<MediaEffect> {
        if !self.joined && !matches!(update, RoomUpdate::Joined { .. } | RoomUpdate::Left { .. }) {
            debug!(room = %self.id, "dropping room update received before Joined");
            return Vec::new();
        }
        match update {
            RoomUpdate::Joined {
                room,
                media_ids,
                own_peer_id,
            } => self.apply_joined(room, media_ids, own_peer_id),
            RoomUpdate::Left { reason } => self.leave(reason),
            RoomUpdate::UserDataChanged { user_data } => {
                self.user_data = user_data.clone();
                self.events
                    .emit(&RoomEvent::RoomUserDataChanged { user_data });
                Vec::new()
            }
            RoomUpdate::PeerJoined { peer } => self.apply_peer_joined(peer),
            RoomUpdate::PeerLeft { peer_id } => self.apply_peer_left(peer_id),
        }
    }

    /// Apply one `PeerUpdated` record. Dropped before the first `Joined`.
    pub fn apply_peer_update(&mut self, update: PeerUpdate) -> Vec<MediaEffect> {
        if !self.joined {
            debug!(room = %self.id, "dropping peer update received before Joined");
            return Vec::new();
        }
        match update {
            PeerUpdate::UserDataChanged { peer_id, user_data } => {
                self.apply_peer_user_data(peer_id, user_data);
                Vec::new()
            }
            PeerUpdate::MediaStarted { peer_id, media } => {
                if peer_id == self.own_peer.id() {
                    debug!(media_id = media.id, "ignoring MediaStarted for own peer");
                    return Vec::new();
                }
                let Some(peer) = self.peers.get_mut(&peer_id) else {
                    warn!(peer_id, media_id = media.id, "MediaStarted for unknown peer");
                    return Vec::new();
                };
                if peer.media(media.id).is_some() {
                    return Vec::new();
                }
                peer.insert_media(Media::new(media.id, peer_id, true, media.properties));
                emit_media_started(&mut self.events, peer, media.id);
                vec![MediaEffect::StartDecoder { media_id: media.id }]
            }
            PeerUpdate::MediaStopped { peer_id, media_id } => {
                if peer_id == self.own_peer.id() {
                    return self.remove_local_media(media_id).unwrap_or_default();
                }
                let Some(peer) = self.peers.get_mut(&peer_id) else {
                    return Vec::new();
                };
                let Some(media) = peer.remove_media(media_id) else {
                    return Vec::new();
                };
                emit_media_stopped(&mut self.events, peer, media);
                vec![MediaEffect::StopDecoder { media_id }]
            }
        }
    }

    pub fn apply_message(&mut self, message: MessageReceived) {
        let MessageReceived {
            sender_peer_id,
            message,
        } = message;

        if let Some(peer) = self.peers.get_mut(&sender_peer_id) {
            peer.events.emit(&PeerEvent::MessageReceived {
                message: message.clone(),
            });
        }
        self.events.emit(&RoomEvent::MessageReceived {
            sender_peer_id,
            message,
        });
    }

    /// Route a codec activity report to its media. Returns true on change.
    pub fn set_media_activity(&mut self, media_id: u64, active: bool) -> bool {
        let Room {
            own_peer,
            peers,
            events,
            ..
        } = self;

        let peer = if own_peer.media(media_id).is_some() {
            own_peer
        } else {
            match peers.values_mut().find(|peer| peer.media(media_id).is_some()) {
                Some(peer) => peer,
                None => return false,
            }
        };

        let changed = peer
            .media_mut(media_id)
            .map(|media| media.set_active(active))
            .unwrap_or(false);
        if changed {
            let peer_id = peer.id();
            peer.events
                .emit(&PeerEvent::MediaActivityChanged { media_id, active });
            events.emit(&RoomEvent::MediaActivityChanged {
                peer_id,
                media_id,
                active,
            });
        }
        changed
    }

    /// Take an id from the local peer's free pool for a new local media
    pub fn reserve_local_media_id(&mut self) -> Result<u64, RoomError> {
        if self.state != ConnectionState::Connected {
            return Err(RoomError::NotConnected);
        }
        if self.own_peer.medias().next().is_some() {
            return Err(RoomError::LocalMediaLimit);
        }
        self.own_peer
            .take_free_media_id()
            .ok_or(RoomError::NoFreeMediaId)
    }

    pub fn release_local_media_id(&mut self, media_id: u64) {
        self.own_peer.release_media_id(media_id);
    }

    /// Attach a local media under an id from [`Room::reserve_local_media_id`]
    pub fn add_local_media(&mut self, media_id: u64, properties: Value) {
        let peer_id = self.own_peer.id();
        self.own_peer
            .insert_media(Media::new(media_id, peer_id, false, properties));
        emit_media_started(&mut self.events, &mut self.own_peer, media_id);
    }

    /// Detach a local media and return its id to the pool
    pub fn remove_local_media(&mut self, media_id: u64) -> Result<Vec<MediaEffect>, RoomError> {
        let media = self
            .own_peer
            .remove_media(media_id)
            .ok_or(RoomError::MediaNotFound(media_id))?;
        emit_media_stopped(&mut self.events, &mut self.own_peer, media);
        self.own_peer.release_media_id(media_id);
        Ok(vec![MediaEffect::StopEncoder { media_id }])
    }

    /// Returns whether the flag changed
    pub fn set_media_paused(&mut self, media_id: u64, paused: bool) -> Result<bool, RoomError> {
        self.media_mut(media_id)
            .map(|media| media.set_paused(paused))
            .ok_or(RoomError::MediaNotFound(media_id))
    }

    /// Replace the local peer's user data after a successful `UpdatePeer`
    pub fn set_own_user_data(&mut self, user_data: Vec<u8>) {
        let own_id = self.own_peer.id();
        self.apply_peer_user_data(own_id, user_data);
    }

    /// Drop every media and remote peer and move to `Disconnected`.
    ///
    /// Only `ConnectionStateChanged` and `Left` fire on the room. Media and
    /// peer registries get no `MediaStopped` or `PeerLeft`; each media still
    /// fires its own `Stopped`.
    pub fn leave(&mut self, reason: String) -> Vec<MediaEffect> {
        let mut effects = Vec::new();

        for media in self.own_peer.take_medias() {
            let media_id = media.id();
            media.stopped();
            self.own_peer.release_media_id(media_id);
            effects.push(MediaEffect::StopEncoder { media_id });
        }
        for (_, mut peer) in self.peers.drain() {
            for media in peer.take_medias() {
                effects.push(MediaEffect::StopDecoder {
                    media_id: media.id(),
                });
                media.stopped();
            }
        }

        let old = self.state;
        if old != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            self.events.emit(&RoomEvent::ConnectionStateChanged {
                old,
                new: ConnectionState::Disconnected,
            });
        }
        if self.joined {
            self.joined = false;
            self.events.emit(&RoomEvent::Left { reason });
        }
        effects
    }

    fn apply_joined(&mut self, room: RoomSnapshot, media_ids: Vec<u64>, own_peer_id: u64) -> Vec<MediaEffect> {
        let mut effects = Vec::new();
        let rejoin = self.joined;

        // A repeated Joined replaces the graph: the old one is torn down
        // through the regular stop and leave events first
        if rejoin {
            let mut own_medias = self.own_peer.take_medias();
            own_medias.sort_by_key(Media::id);
            for media in own_medias {
                let media_id = media.id();
                emit_media_stopped(&mut self.events, &mut self.own_peer, media);
                effects.push(MediaEffect::StopEncoder { media_id });
            }
            let mut peer_ids: Vec<u64> = self.peers.keys().copied().collect();
            peer_ids.sort_unstable();
            for peer_id in peer_ids {
                effects.extend(self.apply_peer_left(peer_id));
            }
        }

        if let Some(id) = room.id.as_deref().filter(|id| *id != self.id) {
            warn!(expected = %self.id, got = %id, "Joined snapshot for a different room id");
        }
        self.customer = room.customer;
        self.user_data = room.user_data;
        let (media_ids, unusable): (Vec<u64>, Vec<u64>) =
            media_ids.into_iter().partition(|id| *id <= MAX_MEDIA_ID);
        if !unusable.is_empty() {
            warn!(room = %self.id, ?unusable, "media ids beyond the packet header range left out of the pool");
        }
        self.own_peer.seed_local(own_peer_id, media_ids);

        for snapshot in room.peers {
            if snapshot.id == own_peer_id {
                self.own_peer.set_user_id(snapshot.user_id);
                continue;
            }
            if rejoin {
                effects.extend(self.apply_peer_joined(snapshot));
                continue;
            }
            let peer_id = snapshot.id;
            self.peers.insert(peer_id, Peer::remote(peer_id, snapshot.user_id, snapshot.user_data));
            effects.extend(self.attach_snapshot_medias(peer_id, snapshot.medias));
        }

        self.joined = true;
        self.events.emit(&RoomEvent::Joined { own_peer_id });
        self.set_connection_state(ConnectionState::Connected);
        effects
    }

    fn apply_peer_joined(&mut self, snapshot: PeerSnapshot) -> Vec<MediaEffect> {
        let peer_id = snapshot.id;
        if peer_id == self.own_peer.id() || self.peers.contains_key(&peer_id) {
            debug!(peer_id, "ignoring PeerJoined for known peer");
            return Vec::new();
        }

        self.peers.insert(
            peer_id,
            Peer::remote(peer_id, snapshot.user_id.clone(), snapshot.user_data.clone()),
        );
        self.events.emit(&RoomEvent::PeerJoined {
            peer_id,
            user_id: snapshot.user_id,
            user_data: snapshot.user_data,
        });
        self.attach_snapshot_medias(peer_id, snapshot.medias)
    }

    fn apply_peer_left(&mut self, peer_id: u64) -> Vec<MediaEffect> {
        let Some(mut peer) = self.peers.remove(&peer_id) else {
            debug!(peer_id, "ignoring PeerLeft for unknown peer");
            return Vec::new();
        };

        let mut effects = Vec::new();
        let mut medias = peer.take_medias();
        medias.sort_by_key(Media::id);
        for media in medias {
            effects.push(MediaEffect::StopDecoder {
                media_id: media.id(),
            });
            emit_media_stopped(&mut self.events, &mut peer, media);
        }
        self.events.emit(&RoomEvent::PeerLeft { peer_id });
        effects
    }

    fn apply_peer_user_data(&mut self, peer_id: u64, user_data: Vec<u8>) {
        let peer = if peer_id == self.own_peer.id() {
            &mut self.own_peer
        } else {
            match self.peers.get_mut(&peer_id) {
                Some(peer) => peer,
                None => {
                    warn!(peer_id, "UserDataChanged for unknown peer");
                    return;
                }
            }
        };

        peer.set_user_data(user_data.clone());
        peer.events.emit(&PeerEvent::UserDataChanged {
            user_data: user_data.clone(),
        });
        self.events
            .emit(&RoomEvent::PeerUserDataChanged { peer_id, user_data });
    }

    fn attach_snapshot_medias(
        &mut self,
        peer_id: u64,
        medias: Vec<MediaSnapshot>,
    ) -> Vec<MediaEffect> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Vec::new();
        };

        let mut effects = Vec::with_capacity(medias.len());
        for snapshot in medias {
            if peer.media(snapshot.id).is_some() {
                continue;
            }
            peer.insert_media(Media::new(snapshot.id, peer_id, true, snapshot.properties));
            emit_media_started(&mut self.events, peer, snapshot.id);
            effects.push(MediaEffect::StartDecoder {
                media_id: snapshot.id,
            });
        }
        effects
    }
}

fn emit_media_started(events: &mut EventRegistry<RoomEvent>, peer: &mut Peer, media_id: u64) {
    let peer_id = peer.id();
    peer.events.emit(&PeerEvent::MediaStarted { media_id });
    events.emit(&RoomEvent::MediaStarted { peer_id, media_id });
}

/// Peer-scoped event, then room-scoped, then the media's own `Stopped`
fn emit_media_stopped(events: &mut EventRegistry<RoomEvent>, peer: &mut Peer, media: Media) {
    let peer_id = peer.id();
    let media_id = media.id();
    peer.events.emit(&PeerEvent::MediaStopped { media_id });
    events.emit(&RoomEvent::MediaStopped { peer_id, media_id });
    media.stopped();
}
