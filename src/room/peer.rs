//! Peer: a participant, local or remote, within a room

use std::collections::HashMap;

use super::events::{EventRegistry, PeerEvent, SubscriptionId};
use super::media::Media;

#[derive(Debug)]
pub struct Peer {
    id: u64,
    user_id: String,
    user_data: Vec<u8>,
    remote: bool,
    medias: HashMap<u64, Media>,
    /// Server-allocated ids for new local media (local peer only)
    free_media_ids: Vec<u64>,
    pub(crate) events: EventRegistry<PeerEvent>,
}

impl Peer {
    pub(crate) fn remote(id: u64, user_id: String, user_data: Vec<u8>) -> Self {
        Self {
            id,
            user_id,
            user_data,
            remote: true,
            medias: HashMap::new(),
            free_media_ids: Vec::new(),
            events: EventRegistry::new(),
        }
    }

    pub(crate) fn local(user_id: String, user_data: Vec<u8>) -> Self {
        Self {
            remote: false,
            ..Self::remote(0, user_id, user_data)
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn medias(&self) -> impl Iterator<Item = &Media> {
        self.medias.values()
    }

    pub fn media(&self, id: u64) -> Option<&Media> {
        self.medias.get(&id)
    }

    pub fn media_mut(&mut self, id: u64) -> Option<&mut Media> {
        self.medias.get_mut(&id)
    }

    pub fn free_media_ids(&self) -> &[u64] {
        &self.free_media_ids
    }

    pub fn on<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&PeerEvent) + Send + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Re-seed the local peer from a `Joined` record
    pub(crate) fn seed_local(&mut self, id: u64, free_media_ids: Vec<u64>) {
        self.id = id;
        self.free_media_ids = free_media_ids;
    }

    pub(crate) fn set_user_id(&mut self, user_id: String) {
        self.user_id = user_id;
    }

    pub(crate) fn set_user_data(&mut self, user_data: Vec<u8>) {
        self.user_data = user_data;
    }

    pub(crate) fn insert_media(&mut self, media: Media) {
        self.medias.insert(media.id(), media);
    }

    pub(crate) fn remove_media(&mut self, id: u64) -> Option<Media> {
        self.medias.remove(&id)
    }

    pub(crate) fn take_medias(&mut self) -> Vec<Media> {
        self.medias.drain().map(|(_, media)| media).collect()
    }

    pub(crate) fn take_free_media_id(&mut self) -> Option<u64> {
        if self.free_media_ids.is_empty() {
            None
        } else {
            Some(self.free_media_ids.remove(0))
        }
    }

    pub(crate) fn release_media_id(&mut self, id: u64) {
        if !self.free_media_ids.contains(&id) {
            self.free_media_ids.push(id);
        }
    }
}
