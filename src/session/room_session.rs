//! One joined room: the room channel plus the task that owns the [`Room`]
//!
//! The room graph lives on a single tokio task. Inbound notifications,
//! audio activity and caller operations all reach it as messages and run
//! one at a time, in arrival order, so the graph is never shared. Callers
//! hold a cheap [`RoomHandle`].

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::methods::{
    AttachStreamParams, MediaIdParams, MediaParams, Position, PositionParams, SendMessageParams,
    UserDataParams, ATTACH_STREAM, PAUSE_MEDIA, RESUME_MEDIA, SEND_MESSAGE, SET_PEER_POSITION,
    START_MEDIA, STOP_MEDIA, UPDATE_PEER, UPDATE_ROOM,
};
use crate::codec::{CodecCommand, CodecController};
use crate::error::{RoomError, RpcError};
use crate::protocol::{to_value, Value};
use crate::room::update::{
    parse_message_received, parse_peer_updated, parse_room_updated, MESSAGE_RECEIVED,
    PEER_UPDATED, ROOM_UPDATED,
};
use crate::room::{ConnectionState, MediaEffect, Room, RoomEvent, RoomUpdate, SubscriptionId};
use crate::rpc::{Connection, Inbound};

/// Which room owns each live media id
pub(crate) type MediaRoutes = Arc<DashMap<u64, String>>;

/// Rooms currently joined, by room id
pub(crate) type RoomRegistry = Arc<DashMap<String, RoomHandle>>;

type RoomTask = Box<dyn FnOnce(&mut RoomActor) + Send>;

pub(crate) struct RoomActor {
    room: Room,
    connection: Connection,
    codec: CodecController,
    routes: MediaRoutes,
    state: watch::Sender<ConnectionState>,
    leave_reason: Option<String>,
}

impl RoomActor {
    fn handle_inbound(&mut self, inbound: Inbound) {
        let room_id = self.room.id().to_string();

        match inbound.method.as_str() {
            ROOM_UPDATED => match parse_room_updated(&inbound.params) {
                Ok(records) => {
                    for record in records {
                        match record {
                            Ok(update) => {
                                let left = matches!(update, RoomUpdate::Left { .. });
                                let effects = self.room.apply_room_update(update);
                                self.apply_effects(effects);
                                if left {
                                    info!(room = %room_id, "server closed the room");
                                    self.connection.close();
                                }
                            }
                            Err(e) => {
                                warn!(room = %room_id, error = %e, "dropping invalid room update")
                            }
                        }
                    }
                }
                Err(e) => warn!(room = %room_id, error = %e, "dropping malformed RoomUpdated"),
            },
            PEER_UPDATED => match parse_peer_updated(&inbound.params) {
                Ok(update) => {
                    let effects = self.room.apply_peer_update(update);
                    self.apply_effects(effects);
                }
                Err(e) => warn!(room = %room_id, error = %e, "dropping invalid peer update"),
            },
            MESSAGE_RECEIVED => match parse_message_received(&inbound.params) {
                Ok(message) => self.room.apply_message(message),
                Err(e) => warn!(room = %room_id, error = %e, "dropping invalid message"),
            },
            other => debug!(room = %room_id, method = other, "ignoring unknown room notification"),
        }
    }

    fn apply_effects(&mut self, effects: Vec<MediaEffect>) {
        for effect in effects {
            let result = match effect {
                MediaEffect::StartDecoder { media_id } => {
                    self.routes.insert(media_id, self.room.id().to_string());
                    self.codec.send(CodecCommand::StartDecoder { media_id })
                }
                MediaEffect::StopDecoder { media_id } => {
                    self.routes.remove(&media_id);
                    self.codec.send(CodecCommand::StopDecoder { media_id })
                }
                MediaEffect::StopEncoder { media_id } => {
                    self.routes.remove(&media_id);
                    self.codec.send(CodecCommand::StopEncoder { media_id })
                }
            };
            if let Err(e) = result {
                warn!(room = %self.room.id(), error = %e, "codec context unavailable");
            }
        }
    }

    fn add_local_media(&mut self, media_id: u64, properties: Value) {
        self.room.add_local_media(media_id, properties);
        self.routes.insert(media_id, self.room.id().to_string());
        if let Err(e) = self.codec.send(CodecCommand::StartEncoder { media_id }) {
            warn!(media_id, error = %e, "failed to start encoder");
        }
    }

    fn remove_local_media(&mut self, media_id: u64) -> Result<(), RoomError> {
        let effects = self.room.remove_local_media(media_id)?;
        self.apply_effects(effects);
        Ok(())
    }

    pub(crate) fn set_media_activity(&mut self, media_id: u64, active: bool) {
        self.room.set_media_activity(media_id, active);
    }

    fn publish_state(&self) {
        let current = self.room.state();
        self.state.send_if_modified(|state| {
            if *state == current {
                false
            } else {
                *state = current;
                true
            }
        });
    }

    async fn run(
        mut self,
        instance: Uuid,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut tasks: mpsc::UnboundedReceiver<RoomTask>,
        rooms: RoomRegistry,
    ) {
        let connection = self.connection.clone();
        let mut handles_alive = true;

        loop {
            tokio::select! {
                biased;
                message = inbound.recv() => match message {
                    Some(message) => self.handle_inbound(message),
                    None => break,
                },
                _ = connection.closed() => break,
                task = tasks.recv() => match task {
                    Some(task) => task(&mut self),
                    None => {
                        handles_alive = false;
                        connection.close();
                        break;
                    }
                },
            }
            self.publish_state();
        }

        // Frames read before the close still apply
        while let Ok(message) = inbound.try_recv() {
            self.handle_inbound(message);
        }

        if self.room.state() == ConnectionState::Connecting {
            warn!(room = %self.room.id(), "room channel closed before Joined");
            self.room.set_connection_state(ConnectionState::Error);
        } else {
            let reason = self
                .leave_reason
                .take()
                .unwrap_or_else(|| "channel closed".to_string());
            let effects = self.room.leave(reason);
            self.apply_effects(effects);
        }
        self.publish_state();
        rooms.remove_if(self.room.id(), |_, handle| handle.instance == instance);
        info!(room = %self.room.id(), state = %self.room.state(), "room channel finished");

        // Keep answering queries for as long as someone holds a handle
        if handles_alive {
            while let Some(task) = tasks.recv().await {
                task(&mut self);
                self.publish_state();
            }
        }
    }
}

/// Caller-side handle to a joined room. Clones share the same room.
#[derive(Clone)]
pub struct RoomHandle {
    instance: Uuid,
    room_id: String,
    connection: Connection,
    tasks: mpsc::UnboundedSender<RoomTask>,
    state: watch::Receiver<ConnectionState>,
}

impl RoomHandle {
    /// Take ownership of `room` and bind it to a freshly opened room channel.
    ///
    /// The inbound handler is registered before `AttachStream` goes out, so
    /// no update sent in response can be missed.
    pub(crate) fn spawn(
        room: Room,
        connection: Connection,
        stream_id: &str,
        codec: CodecController,
        routes: MediaRoutes,
        rooms: RoomRegistry,
    ) -> Result<Self, RpcError> {
        let instance = Uuid::new_v4();
        let room_id = room.id().to_string();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(room.state());

        connection.set_handler(move |inbound: Inbound| {
            let ack = inbound.id.map(|_| Value::Nil);
            if inbound_tx.send(inbound).is_err() {
                debug!("room task gone, inbound message dropped");
            }
            ack
        });

        let handle = Self {
            instance,
            room_id,
            connection: connection.clone(),
            tasks: tasks_tx,
            state: state_rx,
        };
        rooms.insert(handle.room_id.clone(), handle.clone());

        let actor = RoomActor {
            room,
            connection: connection.clone(),
            codec,
            routes,
            state: state_tx,
            leave_reason: None,
        };
        tokio::spawn(actor.run(instance, inbound_rx, tasks_rx, rooms));

        let params = to_value(&AttachStreamParams {
            stream_id: stream_id.to_string(),
        })?;
        connection.notify(ATTACH_STREAM, params)?;
        debug!(room = %handle.room_id, stream_id, "room channel attached");
        Ok(handle)
    }

    pub fn id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the room state satisfies `done`, returning that state.
    /// Returns the last known state if the room task has exited.
    pub async fn wait_for_state<F>(&self, mut done: F) -> ConnectionState
    where
        F: FnMut(ConnectionState) -> bool,
    {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| done(*s)).await.map(|s| *s);
        reached.unwrap_or_else(|_| *state.borrow())
    }

    /// Run `f` against the room on its owning task
    pub async fn with<R, F>(&self, f: F) -> Result<R, RoomError>
    where
        F: FnOnce(&mut Room) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run(move |actor| f(&mut actor.room)).await
    }

    /// Subscribe to room-level events
    pub async fn on<F>(&self, listener: F) -> Result<SubscriptionId, RoomError>
    where
        F: FnMut(&RoomEvent) + Send + 'static,
    {
        self.with(move |room| room.on(listener)).await
    }

    pub async fn update_room_user_data(&self, user_data: Vec<u8>) -> Result<(), RoomError> {
        self.ensure_connected()?;
        self.call(UPDATE_ROOM, &UserDataParams { user_data }).await
    }

    /// Replace the local peer's user data on the server and locally
    pub async fn update_own_user_data(&self, user_data: Vec<u8>) -> Result<(), RoomError> {
        self.ensure_connected()?;
        self.call(
            UPDATE_PEER,
            &UserDataParams {
                user_data: user_data.clone(),
            },
        )
        .await?;
        self.with(move |room| room.set_own_user_data(user_data)).await
    }

    pub async fn set_position(&self, position: Position) -> Result<(), RoomError> {
        self.ensure_connected()?;
        self.call(SET_PEER_POSITION, &PositionParams { position }).await
    }

    /// Send an application message, to everyone when `target_peer_ids` is `None`
    pub async fn send_message(
        &self,
        message: Vec<u8>,
        target_peer_ids: Option<Vec<u64>>,
    ) -> Result<(), RoomError> {
        self.ensure_connected()?;
        self.call(
            SEND_MESSAGE,
            &SendMessageParams {
                message,
                target_peer_ids,
            },
        )
        .await
    }

    /// Mint a local media from the free id pool and start encoding it
    pub async fn start_local_media(&self, properties: Value) -> Result<u64, RoomError> {
        self.ensure_connected()?;
        let media_id = self.with(|room| room.reserve_local_media_id()).await??;

        let params = MediaParams {
            media_id,
            properties: properties.clone(),
        };
        match self.call(START_MEDIA, &params).await {
            Ok(()) => {
                self.run(move |actor| actor.add_local_media(media_id, properties))
                    .await?;
                info!(room = %self.room_id, media_id, "local media started");
                Ok(media_id)
            }
            Err(e) => {
                let _ = self
                    .with(move |room| room.release_local_media_id(media_id))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn stop_local_media(&self, media_id: u64) -> Result<(), RoomError> {
        self.ensure_connected()?;
        let properties = self
            .with(move |room| {
                room.own_peer()
                    .media(media_id)
                    .map(|media| media.properties().clone())
            })
            .await?
            .ok_or(RoomError::MediaNotFound(media_id))?;

        self.call(STOP_MEDIA, &MediaParams { media_id, properties })
            .await?;
        self.run(move |actor| actor.remove_local_media(media_id))
            .await??;
        info!(room = %self.room_id, media_id, "local media stopped");
        Ok(())
    }

    pub async fn pause_media(&self, media_id: u64) -> Result<(), RoomError> {
        self.set_paused(media_id, true).await
    }

    pub async fn resume_media(&self, media_id: u64) -> Result<(), RoomError> {
        self.set_paused(media_id, false).await
    }

    /// Close the room channel and wait for the room to reach `Disconnected`
    pub async fn leave(&self) {
        let _ = self
            .run(|actor| actor.leave_reason = Some("left".to_string()))
            .await;
        self.connection.close();
        self.wait_for_state(|state| {
            !matches!(state, ConnectionState::Connected | ConnectionState::Connecting)
        })
        .await;
    }

    /// Close the channel without waiting
    pub(crate) fn close_channel(&self) {
        self.connection.close();
    }

    /// Queue `task` without waiting for it to run
    pub(crate) fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut RoomActor) + Send + 'static,
    {
        self.tasks.send(Box::new(task)).is_ok()
    }

    async fn run<R, F>(&self, f: F) -> Result<R, RoomError>
    where
        F: FnOnce(&mut RoomActor) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let posted = self.post(move |actor| {
            let _ = tx.send(f(actor));
        });
        if !posted {
            return Err(RoomError::NotConnected);
        }
        rx.await.map_err(|_| RoomError::NotConnected)
    }

    async fn set_paused(&self, media_id: u64, paused: bool) -> Result<(), RoomError> {
        self.ensure_connected()?;
        let known = self
            .with(move |room| room.media(media_id).is_some())
            .await?;
        if !known {
            return Err(RoomError::MediaNotFound(media_id));
        }

        let method = if paused { PAUSE_MEDIA } else { RESUME_MEDIA };
        self.call(method, &MediaIdParams { media_id }).await?;
        self.with(move |room| room.set_media_paused(media_id, paused))
            .await??;
        Ok(())
    }

    async fn call<P: Serialize>(&self, method: &str, params: &P) -> Result<(), RoomError> {
        self.connection.call::<P, Value>(method, params).await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), RoomError> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(RoomError::NotConnected)
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::protocol::value::map;
    use crate::protocol::Value;

    pub fn peer(id: u64, user_id: &str, media_ids: &[u64]) -> Value {
        map([
            ("id", Value::from(id)),
            ("user_id", Value::from(user_id)),
            (
                "medias",
                Value::Array(
                    media_ids
                        .iter()
                        .map(|id| map([("id", Value::from(*id))]))
                        .collect(),
                ),
            ),
            ("user_data", Value::Array(vec![])),
        ])
    }

    pub fn room_updated(records: Vec<Value>) -> Value {
        map([("updates", Value::Array(records))])
    }

    pub fn joined(own_peer_id: u64, media_ids: &[u64], peers: Vec<Value>) -> Value {
        room_updated(vec![map([
            ("kind", Value::from("Joined")),
            ("own_peer_id", Value::from(own_peer_id)),
            (
                "media_ids",
                Value::Array(media_ids.iter().map(|id| Value::from(*id)).collect()),
            ),
            ("room", map([("peers", Value::Array(peers))])),
        ])])
    }
}
