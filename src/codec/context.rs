//! Codec execution context
//!
//! A dedicated thread owning every encoder and decoder. The control side talks
//! to it only through fire-and-forget [`CodecCommand`]s and hears back through
//! [`CodecEvent`]s. The renderer side is reached only through the ring
//! buffers and the renderer's command queue.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::gate::{ActivityDetector, SpeechDetectionConfig, VolumeGateConfig};
use super::{CodecFactory, FrameDecoder, FrameEncoder};
use crate::audio::{capture_ring, decode_ring, CaptureReader, RendererHandle, RingWriter};
use crate::constants::{BLOCK_DURATION_MS, DEFAULT_CAPTURE_BLOCKS, DEFAULT_RING_SLOTS};
use crate::error::CodecError;

/// How often rings are serviced when no message arrives
const SERVICE_INTERVAL: Duration = Duration::from_millis(2);

/// Inbound packets kept per decoder before the oldest is dropped
const MAX_QUEUED_PACKETS: usize = 8;

/// Ring sizes used for every stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    pub ring_slots: usize,
    pub capture_blocks: usize,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            ring_slots: DEFAULT_RING_SLOTS,
            capture_blocks: DEFAULT_CAPTURE_BLOCKS,
        }
    }
}

/// Control messages, all fire-and-forget
pub enum CodecCommand {
    Initialize {
        renderer: RendererHandle,
        settings: CodecSettings,
    },
    StartEncoder {
        media_id: u64,
    },
    StopEncoder {
        media_id: u64,
    },
    StartDecoder {
        media_id: u64,
    },
    StopDecoder {
        media_id: u64,
    },
    SetSpeechDetectionConfig(SpeechDetectionConfig),
    SetVolumeGateConfig(VolumeGateConfig),
    /// `None` sets the master volume
    SetPlaybackVolume {
        media_id: Option<u64>,
        volume: f32,
    },
    Stop,
}

impl CodecCommand {
    fn name(&self) -> &'static str {
        match self {
            CodecCommand::Initialize { .. } => "initialize",
            CodecCommand::StartEncoder { .. } => "start_encoder",
            CodecCommand::StopEncoder { .. } => "stop_encoder",
            CodecCommand::StartDecoder { .. } => "start_decoder",
            CodecCommand::StopDecoder { .. } => "stop_decoder",
            CodecCommand::SetSpeechDetectionConfig(_) => "set_speech_detection_config",
            CodecCommand::SetVolumeGateConfig(_) => "set_volume_gate_config",
            CodecCommand::SetPlaybackVolume { .. } => "set_playback_volume",
            CodecCommand::Stop => "stop",
        }
    }
}

/// Output of the codec context
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent {
    /// Compressed audio to send for a local media
    Packet { media_id: u64, payload: Bytes },
    Activity { media_id: u64, active: bool },
    Error { media_id: Option<u64>, message: String },
}

enum Message {
    Command(CodecCommand),
    Packet { media_id: u64, payload: Bytes },
}

/// Cloneable sender half of the codec context
#[derive(Clone)]
pub struct CodecController {
    tx: Sender<Message>,
}

impl CodecController {
    pub fn send(&self, command: CodecCommand) -> Result<(), CodecError> {
        self.tx
            .send(Message::Command(command))
            .map_err(|_| CodecError::Stopped)
    }

    /// Queue an inbound packet for a remote media's decoder
    pub fn push_packet(&self, media_id: u64, payload: Bytes) -> Result<(), CodecError> {
        self.tx
            .send(Message::Packet { media_id, payload })
            .map_err(|_| CodecError::Stopped)
    }
}

/// Owner of the codec thread. Stopping is idempotent and happens on drop.
pub struct CodecContext {
    controller: CodecController,
    thread: Option<JoinHandle<()>>,
}

impl CodecContext {
    pub fn spawn(
        factory: Arc<dyn CodecFactory>,
        events: UnboundedSender<CodecEvent>,
    ) -> Result<Self, CodecError> {
        let (tx, rx) = unbounded();
        let worker = Worker::new(factory, events);

        let thread = thread::Builder::new()
            .name("codec".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| CodecError::EncoderInit(format!("failed to spawn codec thread: {}", e)))?;

        Ok(Self {
            controller: CodecController { tx },
            thread: Some(thread),
        })
    }

    pub fn controller(&self) -> CodecController {
        self.controller.clone()
    }

    pub fn send(&self, command: CodecCommand) -> Result<(), CodecError> {
        self.controller.send(command)
    }

    pub fn push_packet(&self, media_id: u64, payload: Bytes) -> Result<(), CodecError> {
        self.controller.push_packet(media_id, payload)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Stop the thread and release every ring. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.controller.tx.send(Message::Command(CodecCommand::Stop));
        if thread.join().is_err() {
            warn!("codec thread panicked");
        }
    }
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EncoderState {
    encoder: Box<dyn FrameEncoder>,
    reader: CaptureReader,
    activity: ActivityDetector,
}

struct DecoderState {
    decoder: Box<dyn FrameDecoder>,
    writer: RingWriter,
    packets: VecDeque<Bytes>,
    /// Requested indices with the time the request was seen
    pending: VecDeque<(u64, Instant)>,
    activity: ActivityDetector,
}

struct Worker {
    factory: Arc<dyn CodecFactory>,
    events: UnboundedSender<CodecEvent>,
    renderer: Option<RendererHandle>,
    settings: CodecSettings,
    gate: VolumeGateConfig,
    speech: SpeechDetectionConfig,
    encoders: HashMap<u64, EncoderState>,
    decoders: HashMap<u64, DecoderState>,
}

impl Worker {
    fn new(factory: Arc<dyn CodecFactory>, events: UnboundedSender<CodecEvent>) -> Self {
        Self {
            factory,
            events,
            renderer: None,
            settings: CodecSettings::default(),
            gate: VolumeGateConfig::default(),
            speech: SpeechDetectionConfig::default(),
            encoders: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    fn run(mut self, rx: Receiver<Message>) {
        info!(codec = self.factory.name(), "codec context started");
        loop {
            match rx.recv_timeout(SERVICE_INTERVAL) {
                Ok(Message::Command(CodecCommand::Stop))
                | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Message::Command(command)) => self.handle_command(command),
                Ok(Message::Packet { media_id, payload }) => self.handle_packet(media_id, payload),
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.service();
        }
        self.shutdown();
        info!("codec context stopped");
    }

    fn handle_command(&mut self, command: CodecCommand) {
        debug!(command = command.name(), "codec command");
        match command {
            CodecCommand::Initialize { renderer, settings } => {
                self.renderer = Some(renderer);
                self.settings = settings;
            }
            CodecCommand::StartEncoder { media_id } => {
                if let Err(e) = self.start_encoder(media_id) {
                    self.report(Some(media_id), e.to_string());
                }
            }
            CodecCommand::StopEncoder { media_id } => self.stop_encoder(media_id),
            CodecCommand::StartDecoder { media_id } => {
                if let Err(e) = self.start_decoder(media_id) {
                    self.report(Some(media_id), e.to_string());
                }
            }
            CodecCommand::StopDecoder { media_id } => self.stop_decoder(media_id),
            CodecCommand::SetSpeechDetectionConfig(config) => {
                self.speech = config;
                for state in self.encoders.values_mut() {
                    state.activity.set_speech_config(config);
                }
            }
            CodecCommand::SetVolumeGateConfig(config) => {
                self.gate = config;
                for state in self.encoders.values_mut() {
                    state.activity.set_gate_config(config);
                }
                for state in self.decoders.values_mut() {
                    state.activity.set_gate_config(config);
                }
            }
            CodecCommand::SetPlaybackVolume { media_id, volume } => {
                if let Some(renderer) = &self.renderer {
                    if let Err(e) = renderer.set_gain(media_id, volume) {
                        self.report(media_id, e.to_string());
                    }
                }
            }
            CodecCommand::Stop => {}
        }
    }

    fn renderer(&self) -> Result<&RendererHandle, CodecError> {
        self.renderer
            .as_ref()
            .ok_or_else(|| CodecError::EncoderInit("codec context not initialized".into()))
    }

    fn start_encoder(&mut self, media_id: u64) -> Result<(), CodecError> {
        if self.encoders.contains_key(&media_id) {
            return Ok(());
        }
        let renderer = self.renderer()?.clone();
        let encoder = self.factory.encoder()?;
        let (writer, reader) = capture_ring(media_id, self.settings.capture_blocks);
        renderer
            .attach_capture(writer)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        self.encoders.insert(
            media_id,
            EncoderState {
                encoder,
                reader,
                activity: ActivityDetector::new(self.gate, self.speech),
            },
        );
        info!(media_id, "encoder started");
        Ok(())
    }

    fn stop_encoder(&mut self, media_id: u64) {
        let Some(state) = self.encoders.remove(&media_id) else {
            return;
        };
        state.reader.stop();
        if let Some(renderer) = &self.renderer {
            let _ = renderer.detach_capture(media_id);
        }
        if state.activity.is_active() {
            self.emit(CodecEvent::Activity {
                media_id,
                active: false,
            });
        }
        info!(media_id, "encoder stopped");
    }

    fn start_decoder(&mut self, media_id: u64) -> Result<(), CodecError> {
        if self.decoders.contains_key(&media_id) {
            return Ok(());
        }
        let renderer = self.renderer()?.clone();
        let decoder = self.factory.decoder()?;
        let (writer, reader) = decode_ring(media_id, self.settings.ring_slots);
        renderer
            .add_stream(reader)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        self.decoders.insert(
            media_id,
            DecoderState {
                decoder,
                writer,
                packets: VecDeque::with_capacity(MAX_QUEUED_PACKETS),
                pending: VecDeque::new(),
                activity: ActivityDetector::new(self.gate, SpeechDetectionConfig::default()),
            },
        );
        info!(media_id, "decoder started");
        Ok(())
    }

    fn stop_decoder(&mut self, media_id: u64) {
        let Some(state) = self.decoders.remove(&media_id) else {
            return;
        };
        state.writer.stop();
        if let Some(renderer) = &self.renderer {
            let _ = renderer.remove_stream(media_id);
        }
        info!(media_id, "decoder stopped");
    }

    fn handle_packet(&mut self, media_id: u64, payload: Bytes) {
        let Some(state) = self.decoders.get_mut(&media_id) else {
            debug!(media_id, "packet for unknown decoder dropped");
            return;
        };
        if state.packets.len() == MAX_QUEUED_PACKETS {
            state.packets.pop_front();
        }
        state.packets.push_back(payload);
    }

    /// Move blocks through every ring
    fn service(&mut self) {
        let mut events = Vec::new();
        let block_duration = Duration::from_millis(BLOCK_DURATION_MS as u64);
        // Give a packet until halfway to the block's play-out time
        let deadline = block_duration * (self.settings.ring_slots.max(2) as u32 - 1) / 2;

        for (&media_id, state) in self.encoders.iter_mut() {
            while let Some(block) = state.reader.pop() {
                let changed = state
                    .activity
                    .update(block.rms(), state.encoder.speech_probability());
                if let Some(active) = changed {
                    events.push(CodecEvent::Activity { media_id, active });
                }

                if state.activity.gate_open() {
                    match state.encoder.encode(&block.samples) {
                        Ok(payload) => events.push(CodecEvent::Packet { media_id, payload }),
                        Err(e) => events.push(CodecEvent::Error {
                            media_id: Some(media_id),
                            message: e.to_string(),
                        }),
                    }
                }
                state.reader.recycle(block);
            }
        }

        let now = Instant::now();
        for (&media_id, state) in self.decoders.iter_mut() {
            while let Some(index) = state.writer.next_request() {
                state.pending.push_back((index, now));
            }

            while let Some(&(index, requested_at)) = state.pending.front() {
                let packet = state.packets.pop_front();
                if packet.is_none() && now.duration_since(requested_at) < deadline {
                    break;
                }
                state.pending.pop_front();

                let mut block = state.writer.take_block(index);
                if let Err(e) = state.decoder.decode(packet.as_deref(), &mut block.samples) {
                    block.silence();
                    events.push(CodecEvent::Error {
                        media_id: Some(media_id),
                        message: e.to_string(),
                    });
                }
                if let Some(active) = state.activity.update(block.rms(), None) {
                    events.push(CodecEvent::Activity { media_id, active });
                }
                state.writer.write(block);
            }
        }

        for event in events {
            self.emit(event);
        }
        if let Some(renderer) = &self.renderer {
            renderer.collect_garbage();
        }
    }

    fn shutdown(&mut self) {
        let encoders: Vec<u64> = self.encoders.keys().copied().collect();
        for media_id in encoders {
            self.stop_encoder(media_id);
        }
        let decoders: Vec<u64> = self.decoders.keys().copied().collect();
        for media_id in decoders {
            self.stop_decoder(media_id);
        }
        if let Some(renderer) = &self.renderer {
            renderer.collect_garbage();
        }
    }

    fn report(&self, media_id: Option<u64>, message: String) {
        warn!(?media_id, %message, "codec error");
        self.emit(CodecEvent::Error { media_id, message });
    }

    fn emit(&self, event: CodecEvent) {
        // The receiver going away just means nobody is listening anymore
        let _ = self.events.send(event);
    }
}
