//! Voice Room Client
//!
//! Connects with a user token, joins one room and logs what happens in it
//! until Ctrl+C.
//!
//! Usage: `voice-client <token> <room_id> [config.toml]`

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_room_client::{
    codec::default_codec,
    config::ClientConfig,
    constants::*,
    logging::init_tracing,
    network::UdpMediaChannel,
    protocol::Value,
    session::{
        Gateway, HttpGateway, Session, SessionServices, StaticGateway, TcpChannelOpener,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let token = args.next();
    let room_id = args.next().context("usage: voice-client <token> <room_id> [config.toml]")?;
    let config_path = args.next().map(PathBuf::from);

    let config = ClientConfig::load(config_path.as_deref())?;
    init_tracing(config.tracing_config())?;

    tracing::info!("Starting voice room client");

    let token = match token.filter(|t| t != "-").or_else(|| config.gateway.token.clone()) {
        Some(token) => token,
        None => bail!("no token given and none configured"),
    };

    let gateway: Arc<dyn Gateway> = match (&config.gateway.url, &config.gateway.address) {
        (Some(url), _) => Arc::new(HttpGateway::new(
            url,
            Duration::from_millis(config.gateway.timeout_ms),
        )?),
        (None, Some(address)) => Arc::new(StaticGateway {
            address: address.clone(),
        }),
        (None, None) => bail!("configure gateway.url or gateway.address"),
    };

    let media = Arc::new(UdpMediaChannel::bind(config.audio.media_bind)?);
    tracing::info!("Media channel bound to {}", media.local_addr());

    let services = SessionServices {
        gateway,
        opener: Arc::new(TcpChannelOpener::new(config.connection_options())),
        media,
        codec: default_codec(),
    };
    let session = Session::connect(&token, services, config.session_options()).await?;
    tracing::info!("Session {} established, rooms: {:?}", session.id(), session.room_ids());

    // Drive the renderer from a 20 ms clock with silent input
    let renderer_handle = session.renderer_handle().clone();
    if let Some(mut renderer) = session.take_renderer() {
        let clock_handle = renderer_handle.clone();
        std::thread::Builder::new()
            .name("render-clock".into())
            .spawn(move || {
                let input = vec![0.0f32; BLOCK_SAMPLES];
                let mut output = vec![0.0f32; BLOCK_SAMPLES];
                let period = Duration::from_millis(BLOCK_DURATION_MS as u64);
                let mut next = Instant::now();

                while clock_handle.is_running() {
                    renderer.process(&input, &mut output);
                    next += period;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
            })?;
    }

    let room = session
        .join_room_with(&room_id, Vec::new(), [0.0; 3], |room| {
            room.on(|event| tracing::info!(?event, "room event"));
        })
        .await?;
    tracing::info!("Joined room {}", room.id());

    match room.start_local_media(Value::Nil).await {
        Ok(media_id) => tracing::info!("Local media {} started", media_id),
        Err(e) => tracing::warn!("Could not start local media: {}", e),
    }

    tracing::info!("Running - press Ctrl+C to leave");
    let mut stats = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats.tick() => {
                let released = renderer_handle.collect_garbage();
                tracing::info!(
                    "Stats: state {}, {} streams, {} callbacks, {} buffers released",
                    session.connection_state(),
                    renderer_handle.stream_count(),
                    renderer_handle.callbacks(),
                    released
                );
            }
        }
    }

    tracing::info!("Leaving room {}", room.id());
    room.leave().await;
    session.close().await;
    Ok(())
}
