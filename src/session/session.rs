//! Session orchestration
//!
//! `Session::connect` walks the setup stages in order:
//!
//! ```text
//! gateway -> main channel -> Authenticate -> SetupWebRtc -> codec + renderer -> media pumps
//! ```
//!
//! Each stage registers its undo step on a [`Teardown`]. When a stage fails
//! the steps registered so far run in reverse and the caller gets a single
//! [`SessionError::Setup`] naming the stage.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gateway::Gateway;
use super::methods::{
    AuthenticateParams, AuthenticateResult, JoinRoomParams, JoinRoomResult, Position,
    SetupWebRtcParams, SetupWebRtcResult, AUTHENTICATE, JOIN_ROOM, SETUP_WEBRTC,
};
use super::opener::ChannelOpener;
use super::room_session::{MediaRoutes, RoomHandle, RoomRegistry};
use super::teardown::Teardown;
use crate::audio::{renderer, Renderer, RendererHandle};
use crate::codec::{
    CodecCommand, CodecContext, CodecController, CodecEvent, CodecFactory, CodecSettings,
    SpeechDetectionConfig, VolumeGateConfig,
};
use crate::constants::MAX_DECODE_STREAMS;
use crate::error::{NetworkError, RoomError, RpcError, SessionError};
use crate::network::MediaChannel;
use crate::room::{ConnectionState, Room};
use crate::rpc::{Connection, ConnectionOptions};

const MEDIA_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Tuning applied when the session starts
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub rpc: ConnectionOptions,
    pub codec: CodecSettings,
    pub max_streams: usize,
    pub playback_volume: f32,
    pub volume_gate: VolumeGateConfig,
    pub speech_detection: SpeechDetectionConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rpc: ConnectionOptions::default(),
            codec: CodecSettings::default(),
            max_streams: MAX_DECODE_STREAMS,
            playback_volume: 1.0,
            volume_gate: VolumeGateConfig::default(),
            speech_detection: SpeechDetectionConfig::default(),
        }
    }
}

/// External collaborators a session is built from
#[derive(Clone)]
pub struct SessionServices {
    pub gateway: Arc<dyn Gateway>,
    pub opener: Arc<dyn ChannelOpener>,
    pub media: Arc<dyn MediaChannel>,
    pub codec: Arc<dyn CodecFactory>,
}

/// An authenticated connection with its codec context and media channel
pub struct Session {
    id: Uuid,
    main: Connection,
    address: String,
    room_ids: Vec<String>,
    opener: Arc<dyn ChannelOpener>,
    codec: CodecController,
    renderer_handle: RendererHandle,
    renderer: Mutex<Option<Renderer>>,
    rooms: RoomRegistry,
    routes: MediaRoutes,
    join_timeout: Duration,
    teardown: Arc<Teardown>,
}

impl Session {
    /// Run every setup stage. On failure everything opened so far is closed.
    pub async fn connect(
        token: &str,
        services: SessionServices,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let teardown = Arc::new(Teardown::new());
        match Self::setup(token, services, options, teardown.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(error = %e, "session setup failed");
                teardown.run();
                Err(e)
            }
        }
    }

    async fn setup(
        token: &str,
        services: SessionServices,
        options: SessionOptions,
        teardown: Arc<Teardown>,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();

        let grant = services
            .gateway
            .connect(token)
            .await
            .map_err(|e| SessionError::setup("gateway", e))?;

        let main = services
            .opener
            .open(&grant.address, "main")
            .await
            .map_err(|e| SessionError::setup("connect", e))?;
        {
            let main = main.clone();
            teardown.push("main", move || main.close());
        }

        let rooms = RoomRegistry::default();
        {
            let rooms = rooms.clone();
            teardown.push("rooms", move || close_rooms(&rooms));
        }

        let auth: AuthenticateResult = main
            .call(
                AUTHENTICATE,
                &AuthenticateParams {
                    token: grant.token.clone(),
                },
            )
            .await
            .map_err(|e| SessionError::setup("authenticate", e))?;
        debug!(session = %id, rooms = auth.room_ids.len(), "authenticated");

        {
            let media = services.media.clone();
            teardown.push("media", move || media.close());
        }
        let answer: SetupWebRtcResult = main
            .call(
                SETUP_WEBRTC,
                &SetupWebRtcParams {
                    sdp: services.media.local_description(),
                },
            )
            .await
            .map_err(|e| SessionError::setup("media", e))?;
        services
            .media
            .apply_remote_description(&answer.sdp)
            .await
            .map_err(|e| SessionError::setup("media", e))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let codec_context = CodecContext::spawn(services.codec.clone(), events_tx)
            .map_err(|e| SessionError::setup("codec", e))?;
        let codec = codec_context.controller();
        teardown.push("codec", move || {
            let mut codec_context = codec_context;
            codec_context.stop();
        });

        let (renderer_handle, renderer) = renderer(options.max_streams);
        {
            let renderer_handle = renderer_handle.clone();
            teardown.push("renderer", move || renderer_handle.stop());
        }

        let commands = [
            CodecCommand::Initialize {
                renderer: renderer_handle.clone(),
                settings: options.codec,
            },
            CodecCommand::SetVolumeGateConfig(options.volume_gate),
            CodecCommand::SetSpeechDetectionConfig(options.speech_detection),
            CodecCommand::SetPlaybackVolume {
                media_id: None,
                volume: options.playback_volume,
            },
        ];
        for command in commands {
            codec
                .send(command)
                .map_err(|e| SessionError::setup("codec", e))?;
        }

        let routes = MediaRoutes::default();
        let outbound = tokio::spawn(forward_codec_events(
            events_rx,
            services.media.clone(),
            rooms.clone(),
            routes.clone(),
        ));
        let inbound = tokio::spawn(forward_media_packets(services.media.clone(), codec.clone()));
        let watcher = tokio::spawn(watch_main_channel(main.clone(), rooms.clone()));
        teardown.push("tasks", move || {
            outbound.abort();
            inbound.abort();
            watcher.abort();
        });

        info!(session = %id, codec = services.codec.name(), address = %grant.address, "session established");
        Ok(Self {
            id,
            main,
            address: grant.address,
            room_ids: auth.room_ids,
            opener: services.opener,
            codec,
            renderer_handle,
            renderer: Mutex::new(Some(renderer)),
            rooms,
            routes,
            join_timeout: options.rpc.request_timeout,
            teardown,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Rooms the token grants access to
    pub fn room_ids(&self) -> &[String] {
        &self.room_ids
    }

    /// Take the real-time half of the renderer, to be driven by the audio clock.
    /// Only the first call returns it.
    pub fn take_renderer(&self) -> Option<Renderer> {
        self.renderer.lock().take()
    }

    pub fn renderer_handle(&self) -> &RendererHandle {
        &self.renderer_handle
    }

    pub fn codec(&self) -> &CodecController {
        &self.codec
    }

    pub fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    /// Worst of the main channel and every joined room
    pub fn connection_state(&self) -> ConnectionState {
        let main = if self.main.is_open() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.rooms
            .iter()
            .map(|entry| entry.value().state())
            .fold(main, ConnectionState::worst)
    }

    pub async fn join_room(
        &self,
        room_id: &str,
        user_data: Vec<u8>,
        position: Position,
    ) -> Result<RoomHandle, SessionError> {
        self.join_room_with(room_id, user_data, position, |_| {})
            .await
    }

    /// Join a room, letting `configure` subscribe to the room before any
    /// event fires
    pub async fn join_room_with<F>(
        &self,
        room_id: &str,
        user_data: Vec<u8>,
        position: Position,
        configure: F,
    ) -> Result<RoomHandle, SessionError>
    where
        F: FnOnce(&mut Room) + Send,
    {
        if !self.main.is_open() {
            return Err(SessionError::Closed);
        }

        let mut room = Room::new(room_id, "", user_data.clone());
        configure(&mut room);
        room.set_connection_state(ConnectionState::Connecting);

        let params = JoinRoomParams {
            room_id: room_id.to_string(),
            user_data,
            position,
        };
        let joined: JoinRoomResult = match self.main.call(JOIN_ROOM, &params).await {
            Ok(joined) => joined,
            Err(e) => {
                room.set_connection_state(ConnectionState::Error);
                return Err(RoomError::from(e).into());
            }
        };

        let connection = match self.opener.open(&self.address, "room").await {
            Ok(connection) => connection,
            Err(e) => {
                room.set_connection_state(ConnectionState::Error);
                return Err(RoomError::from(e).into());
            }
        };

        let handle = RoomHandle::spawn(
            room,
            connection.clone(),
            &joined.stream_id,
            self.codec.clone(),
            self.routes.clone(),
            self.rooms.clone(),
        )
        .map_err(|e| {
            connection.close();
            SessionError::Room(e.into())
        })?;

        let reached = tokio::time::timeout(
            self.join_timeout,
            handle.wait_for_state(|state| state != ConnectionState::Connecting),
        )
        .await;

        match reached {
            Ok(ConnectionState::Connected) => {
                info!(session = %self.id, room = %room_id, "room joined");
                Ok(handle)
            }
            Ok(state) => {
                warn!(room = %room_id, %state, "room channel failed before Joined");
                Err(RoomError::NotConnected.into())
            }
            Err(_) => {
                handle.close_channel();
                Err(RoomError::Rpc(RpcError::Timeout {
                    method: "Joined".to_string(),
                    after_ms: self.join_timeout.as_millis() as u64,
                })
                .into())
            }
        }
    }

    /// Leave every room, then close the main channel, media channel and codec context
    pub async fn close(&self) {
        let rooms: Vec<RoomHandle> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in rooms {
            room.leave().await;
        }
        if self.teardown.run() > 0 {
            info!(session = %self.id, "session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown.run();
    }
}

fn close_rooms(rooms: &RoomRegistry) {
    let handles: Vec<RoomHandle> = rooms.iter().map(|entry| entry.value().clone()).collect();
    for handle in handles {
        handle.close_channel();
    }
}

/// Closing the main channel takes every room channel down with it
async fn watch_main_channel(main: Connection, rooms: RoomRegistry) {
    main.closed().await;
    if !rooms.is_empty() {
        info!(rooms = rooms.len(), "main channel closed, closing room channels");
    }
    close_rooms(&rooms);
}

/// Route codec output: packets to the media channel, activity to the owning room
async fn forward_codec_events(
    mut events: UnboundedReceiver<CodecEvent>,
    media: Arc<dyn MediaChannel>,
    rooms: RoomRegistry,
    routes: MediaRoutes,
) {
    while let Some(event) = events.recv().await {
        match event {
            CodecEvent::Packet { media_id, payload } => {
                match media.send(media_id, payload).await {
                    Ok(()) => {}
                    Err(e @ (NetworkError::InvalidPacket | NetworkError::PacketTooLarge(_))) => {
                        warn!(media_id, error = %e, "outbound packet cannot be framed");
                    }
                    Err(e) => debug!(media_id, error = %e, "outbound packet dropped"),
                }
            }
            CodecEvent::Activity { media_id, active } => {
                let room_id = routes.get(&media_id).map(|entry| entry.value().clone());
                let handle = room_id.and_then(|id| rooms.get(&id).map(|entry| entry.value().clone()));
                match handle {
                    Some(handle) => {
                        handle.post(move |actor| actor.set_media_activity(media_id, active));
                    }
                    None => debug!(media_id, "activity for unrouted media"),
                }
            }
            CodecEvent::Error { media_id, message } => {
                warn!(?media_id, %message, "codec error");
            }
        }
    }
}

/// Feed inbound packets to their decoders until the media channel closes
async fn forward_media_packets(media: Arc<dyn MediaChannel>, codec: CodecController) {
    loop {
        match media.recv().await {
            Ok((media_id, payload)) => {
                if codec.push_packet(media_id, payload).is_err() {
                    break;
                }
            }
            Err(NetworkError::Closed) => break,
            Err(e) => {
                debug!(error = %e, "media receive failed");
                tokio::time::sleep(MEDIA_RETRY_DELAY).await;
            }
        }
    }
    debug!("media pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmCodec;
    use crate::protocol::value::{get, map};
    use crate::protocol::Value;
    use crate::room::update::ROOM_UPDATED;
    use crate::rpc::test_support::FakeServer;
    use crate::session::gateway::{GatewayGrant, StaticGateway};
    use crate::session::methods::ATTACH_STREAM;
    use crate::session::room_session::fixtures::{joined, peer};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{mpsc::UnboundedSender, watch};

    struct FakeOpener {
        servers: UnboundedSender<(String, FakeServer)>,
    }

    impl FakeOpener {
        fn new() -> (Arc<Self>, UnboundedReceiver<(String, FakeServer)>) {
            let (servers, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { servers }), rx)
        }
    }

    #[async_trait]
    impl ChannelOpener for FakeOpener {
        async fn open(&self, _address: &str, label: &str) -> Result<Connection, RpcError> {
            let (connection, server) = FakeServer::pair(ConnectionOptions::default().labeled(label));
            self.servers
                .send((label.to_string(), server))
                .map_err(|_| RpcError::Connect("test dropped the opener".into()))?;
            Ok(connection)
        }
    }

    struct FakeMedia {
        remote: Mutex<Option<String>>,
        sent: Mutex<Vec<(u64, Bytes)>>,
        closed: watch::Sender<bool>,
    }

    impl FakeMedia {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                remote: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                closed: watch::channel(false).0,
            })
        }

        fn is_closed(&self) -> bool {
            *self.closed.borrow()
        }
    }

    #[async_trait]
    impl MediaChannel for FakeMedia {
        fn local_description(&self) -> String {
            "fake:local".to_string()
        }

        async fn apply_remote_description(&self, description: &str) -> Result<(), NetworkError> {
            if !description.starts_with("fake:") {
                return Err(NetworkError::InvalidDescription(description.to_string()));
            }
            *self.remote.lock() = Some(description.to_string());
            Ok(())
        }

        async fn send(&self, media_id: u64, payload: Bytes) -> Result<(), NetworkError> {
            self.sent.lock().push((media_id, payload));
            Ok(())
        }

        async fn recv(&self) -> Result<(u64, Bytes), NetworkError> {
            let mut closed = self.closed.subscribe();
            let _ = closed.wait_for(|closed| *closed).await;
            Err(NetworkError::Closed)
        }

        fn close(&self) {
            self.closed.send_replace(true);
        }
    }

    struct RejectingGateway;

    #[async_trait]
    impl Gateway for RejectingGateway {
        async fn connect(&self, _token: &str) -> Result<GatewayGrant, SessionError> {
            Err(SessionError::Gateway("unknown token".into()))
        }
    }

    fn services(opener: Arc<FakeOpener>, media: Arc<FakeMedia>) -> SessionServices {
        SessionServices {
            gateway: Arc::new(StaticGateway {
                address: "main.test:4000".into(),
            }),
            opener,
            media,
            codec: Arc::new(PcmCodec),
        }
    }

    /// Answer Authenticate and SetupWebRtc on the main channel
    async fn complete_setup(main: &mut FakeServer) {
        let (id, method, params) = main.expect_request().await;
        assert_eq!(method, AUTHENTICATE);
        assert_eq!(get(&params, "token").and_then(|v| v.as_str()), Some("user"));
        main.respond(id, map([("room_ids", Value::Array(vec![Value::from("r1")]))]))
            .await;

        let (id, method, params) = main.expect_request().await;
        assert_eq!(method, SETUP_WEBRTC);
        assert_eq!(get(&params, "sdp").and_then(|v| v.as_str()), Some("fake:local"));
        main.respond(id, map([("sdp", Value::from("fake:remote"))])).await;
    }

    async fn connected() -> (
        Arc<Session>,
        FakeServer,
        UnboundedReceiver<(String, FakeServer)>,
        Arc<FakeMedia>,
    ) {
        let (opener, mut servers) = FakeOpener::new();
        let media = FakeMedia::new();
        let connect = tokio::spawn(Session::connect(
            "user",
            services(opener, media.clone()),
            SessionOptions::default(),
        ));

        let (label, mut main) = servers.recv().await.unwrap();
        assert_eq!(label, "main");
        complete_setup(&mut main).await;

        let session = connect.await.unwrap().unwrap();
        (Arc::new(session), main, servers, media)
    }

    async fn join_r1(
        session: &Arc<Session>,
        main: &mut FakeServer,
        servers: &mut UnboundedReceiver<(String, FakeServer)>,
    ) -> (RoomHandle, FakeServer) {
        let joining = session.clone();
        let join = tokio::spawn(async move { joining.join_room("r1", vec![], [0.0; 3]).await });

        let (id, method, params) = main.expect_request().await;
        assert_eq!(method, JOIN_ROOM);
        assert_eq!(get(&params, "room_id").and_then(|v| v.as_str()), Some("r1"));
        main.respond(id, map([("stream_id", Value::from("abc"))])).await;

        let (label, mut room) = servers.recv().await.unwrap();
        assert_eq!(label, "room");
        let (method, params) = room.expect_notification().await;
        assert_eq!(method, ATTACH_STREAM);
        assert_eq!(get(&params, "stream_id").and_then(|v| v.as_str()), Some("abc"));

        room.notify(ROOM_UPDATED, joined(7, &[100, 101], vec![peer(9, "bob", &[])]))
            .await;
        (join.await.unwrap().unwrap(), room)
    }

    #[tokio::test]
    async fn test_connect_negotiates_media() {
        let (session, _main, _servers, media) = connected().await;

        assert_eq!(session.room_ids(), ["r1".to_string()]);
        assert_eq!(media.remote.lock().as_deref(), Some("fake:remote"));
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert!(session.take_renderer().is_some());
        assert!(session.take_renderer().is_none());
    }

    #[tokio::test]
    async fn test_join_room() {
        let (session, mut main, mut servers, _media) = connected().await;
        let (room, _room_server) = join_r1(&session, &mut main, &mut servers).await;

        assert_eq!(room.state(), ConnectionState::Connected);
        let (own_id, free, remote) = room
            .with(|room| {
                (
                    room.own_peer().id(),
                    room.own_peer().free_media_ids().to_vec(),
                    room.peers()
                        .map(|peer| (peer.id(), peer.user_id().to_string(), peer.medias().count()))
                        .collect::<Vec<_>>(),
                )
            })
            .await
            .unwrap();

        assert_eq!(own_id, 7);
        assert_eq!(free, vec![100, 101]);
        assert_eq!(remote, vec![(9, "bob".to_string(), 0)]);
        assert!(session.room("r1").is_some());
        assert_eq!(session.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let (session, mut main, _servers, _media) = connected().await;
        let joining = session.clone();
        let join = tokio::spawn(async move { joining.join_room("r2", vec![], [0.0; 3]).await });

        let (id, _, _) = main.expect_request().await;
        main.fail(id, "no such room").await;

        assert!(matches!(
            join.await.unwrap(),
            Err(SessionError::Room(RoomError::Rpc(RpcError::Remote { .. })))
        ));
        assert!(session.room("r2").is_none());
        assert_eq!(session.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_main_close_cascades_to_rooms() {
        let (session, mut main, mut servers, _media) = connected().await;
        let (room, _room_server) = join_r1(&session, &mut main, &mut servers).await;

        drop(main);
        let state = room
            .wait_for_state(|state| state == ConnectionState::Disconnected)
            .await;

        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(
            session.join_room("r1", vec![], [0.0; 3]).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, mut main, mut servers, media) = connected().await;
        let (room, mut room_server) = join_r1(&session, &mut main, &mut servers).await;

        session.close().await;
        session.close().await;

        assert_eq!(room.state(), ConnectionState::Disconnected);
        assert!(media.is_closed());
        room_server.expect_closed().await;
        main.expect_closed().await;
    }

    #[tokio::test]
    async fn test_authenticate_failure_unwinds() {
        let (opener, mut servers) = FakeOpener::new();
        let media = FakeMedia::new();
        let connect = tokio::spawn(Session::connect(
            "user",
            services(opener, media.clone()),
            SessionOptions::default(),
        ));

        let (_, mut main) = servers.recv().await.unwrap();
        let (id, _, _) = main.expect_request().await;
        main.fail(id, "bad token").await;

        match connect.await.unwrap() {
            Err(SessionError::Setup { stage, .. }) => assert_eq!(stage, "authenticate"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("setup should fail"),
        }
        main.expect_closed().await;
        assert!(!media.is_closed());
    }

    #[tokio::test]
    async fn test_media_negotiation_failure_unwinds() {
        let (opener, mut servers) = FakeOpener::new();
        let media = FakeMedia::new();
        let connect = tokio::spawn(Session::connect(
            "user",
            services(opener, media.clone()),
            SessionOptions::default(),
        ));

        let (_, mut main) = servers.recv().await.unwrap();
        let (id, _, _) = main.expect_request().await;
        main.respond(id, map([("room_ids", Value::Array(vec![]))])).await;
        let (id, _, _) = main.expect_request().await;
        main.respond(id, map([("sdp", Value::from("udp:nowhere"))])).await;

        match connect.await.unwrap() {
            Err(SessionError::Setup { stage, .. }) => assert_eq!(stage, "media"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("setup should fail"),
        }
        assert!(media.is_closed());
        main.expect_closed().await;
    }

    #[tokio::test]
    async fn test_gateway_failure_opens_nothing() {
        let (opener, mut servers) = FakeOpener::new();
        let mut services = services(opener, FakeMedia::new());
        services.gateway = Arc::new(RejectingGateway);

        match Session::connect("user", services, SessionOptions::default()).await {
            Err(SessionError::Setup { stage, .. }) => assert_eq!(stage, "gateway"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("setup should fail"),
        }
        assert!(servers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_codec_events_are_routed() {
        let (connection, mut server) = FakeServer::pair(ConnectionOptions::default().labeled("room"));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let codec = CodecContext::spawn(Arc::new(PcmCodec), events_tx).unwrap();
        let rooms = RoomRegistry::default();
        let routes = MediaRoutes::default();

        let mut room = Room::new("r1", "alice", vec![]);
        room.set_connection_state(ConnectionState::Connecting);
        let handle = RoomHandle::spawn(
            room,
            connection,
            "abc",
            codec.controller(),
            routes.clone(),
            rooms.clone(),
        )
        .unwrap();
        server.expect_notification().await;
        server
            .notify(ROOM_UPDATED, joined(7, &[100], vec![peer(9, "bob", &[200])]))
            .await;
        handle
            .wait_for_state(|state| state == ConnectionState::Connected)
            .await;

        let media = FakeMedia::new();
        let (events, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_codec_events(
            events_rx,
            media.clone(),
            rooms.clone(),
            routes.clone(),
        ));

        events
            .send(CodecEvent::Activity {
                media_id: 200,
                active: true,
            })
            .unwrap();
        events
            .send(CodecEvent::Packet {
                media_id: 100,
                payload: Bytes::from_static(b"frame"),
            })
            .unwrap();

        let mut active = false;
        for _ in 0..100 {
            active = handle
                .with(|room| room.media(200).map(|media| media.is_active()).unwrap_or(false))
                .await
                .unwrap();
            if active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(active);

        for _ in 0..100 {
            if !media.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(media.sent.lock().first().map(|(id, _)| *id), Some(100));
    }
}
