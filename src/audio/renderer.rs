//! Real-time renderer
//!
//! [`Renderer::process`] is called by the audio clock once per callback. It
//! mixes every decode ring into the output and feeds the input into the
//! capture ring. Streams are added and removed through a lock-free command
//! queue; anything the renderer lets go of is handed back through a garbage
//! queue so it is dropped on the control side, not in the callback.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::capture::CaptureWriter;
use super::ring::RingReader;
use crate::error::AudioError;

const COMMAND_CAPACITY: usize = 64;

/// Control messages for the renderer
pub enum RendererCommand {
    AddStream(RingReader),
    RemoveStream(u64),
    AttachCapture(CaptureWriter),
    /// Detach the capture only if it belongs to this media
    DetachCapture(u64),
    /// `None` targets the master gain
    SetGain { media_id: Option<u64>, gain: f32 },
}

enum Garbage {
    Stream(RingReader),
    Capture(CaptureWriter),
}

struct RendererShared {
    commands: ArrayQueue<RendererCommand>,
    garbage: ArrayQueue<Garbage>,
    running: AtomicBool,
    callbacks: AtomicU64,
    streams: AtomicUsize,
    max_streams: usize,
}

/// Create a renderer mixing at most `max_streams` decode rings
pub fn renderer(max_streams: usize) -> (RendererHandle, Renderer) {
    let shared = Arc::new(RendererShared {
        commands: ArrayQueue::new(COMMAND_CAPACITY),
        garbage: ArrayQueue::new(max_streams + COMMAND_CAPACITY),
        running: AtomicBool::new(true),
        callbacks: AtomicU64::new(0),
        streams: AtomicUsize::new(0),
        max_streams,
    });

    let handle = RendererHandle {
        shared: shared.clone(),
    };
    let renderer = Renderer {
        shared,
        streams: Vec::with_capacity(max_streams),
        capture: None,
        master_gain: 1.0,
    };
    (handle, renderer)
}

/// Real-time side, owned by the audio callback
pub struct Renderer {
    shared: Arc<RendererShared>,
    streams: Vec<RingReader>,
    capture: Option<CaptureWriter>,
    master_gain: f32,
}

impl Renderer {
    /// Render one callback. `output` is overwritten; silence when stopped.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.shared.callbacks.fetch_add(1, Ordering::Relaxed);
        self.apply_commands();

        output.fill(0.0);
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        for stream in self.streams.iter_mut() {
            stream.mix_into(output);
        }
        if self.master_gain != 1.0 {
            for sample in output.iter_mut() {
                *sample *= self.master_gain;
            }
        }
        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.write(input);
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.shared.commands.pop() {
            match command {
                RendererCommand::AddStream(reader) => {
                    if let Some(pos) = self.position(reader.media_id()) {
                        let old = std::mem::replace(&mut self.streams[pos], reader);
                        self.discard(Garbage::Stream(old));
                    } else if self.streams.len() < self.streams.capacity() {
                        self.streams.push(reader);
                    } else {
                        self.discard(Garbage::Stream(reader));
                    }
                }
                RendererCommand::RemoveStream(media_id) => {
                    if let Some(pos) = self.position(media_id) {
                        let old = self.streams.swap_remove(pos);
                        self.discard(Garbage::Stream(old));
                    }
                }
                RendererCommand::AttachCapture(writer) => {
                    if let Some(old) = self.capture.replace(writer) {
                        self.discard(Garbage::Capture(old));
                    }
                }
                RendererCommand::DetachCapture(media_id) => {
                    if self.capture.as_ref().map(CaptureWriter::media_id) == Some(media_id) {
                        if let Some(old) = self.capture.take() {
                            self.discard(Garbage::Capture(old));
                        }
                    }
                }
                RendererCommand::SetGain { media_id: None, gain } => {
                    self.master_gain = gain;
                }
                RendererCommand::SetGain {
                    media_id: Some(media_id),
                    gain,
                } => {
                    if let Some(pos) = self.position(media_id) {
                        self.streams[pos].set_gain(gain);
                    }
                }
            }
        }
        self.shared
            .streams
            .store(self.streams.len(), Ordering::Relaxed);
    }

    fn position(&self, media_id: u64) -> Option<usize> {
        self.streams.iter().position(|s| s.media_id() == media_id)
    }

    fn discard(&self, garbage: Garbage) {
        // Each command releases at most one item and every send collects
        // first, so the queue never holds more than COMMAND_CAPACITY + 1
        let pushed = self.shared.garbage.push(garbage);
        debug_assert!(pushed.is_ok(), "renderer garbage queue overflow");
    }
}

/// Control side of the renderer
#[derive(Clone)]
pub struct RendererHandle {
    shared: Arc<RendererShared>,
}

impl RendererHandle {
    pub fn send(&self, command: RendererCommand) -> Result<(), AudioError> {
        if !self.is_running() {
            return Err(AudioError::Stopped);
        }
        self.collect_garbage();
        self.shared
            .commands
            .push(command)
            .map_err(|_| AudioError::CommandQueueFull)
    }

    pub fn add_stream(&self, reader: RingReader) -> Result<(), AudioError> {
        if self.stream_count() >= self.shared.max_streams {
            return Err(AudioError::TooManyStreams(self.shared.max_streams));
        }
        self.send(RendererCommand::AddStream(reader))
    }

    pub fn remove_stream(&self, media_id: u64) -> Result<(), AudioError> {
        self.send(RendererCommand::RemoveStream(media_id))
    }

    pub fn attach_capture(&self, writer: CaptureWriter) -> Result<(), AudioError> {
        self.send(RendererCommand::AttachCapture(writer))
    }

    pub fn detach_capture(&self, media_id: u64) -> Result<(), AudioError> {
        self.send(RendererCommand::DetachCapture(media_id))
    }

    pub fn set_gain(&self, media_id: Option<u64>, gain: f32) -> Result<(), AudioError> {
        self.send(RendererCommand::SetGain { media_id, gain })
    }

    /// Drop everything the renderer released. Returns how many items.
    pub fn collect_garbage(&self) -> usize {
        let mut count = 0;
        while let Some(garbage) = self.shared.garbage.pop() {
            match garbage {
                Garbage::Stream(reader) => drop(reader),
                Garbage::Capture(writer) => drop(writer),
            }
            count += 1;
        }
        count
    }

    /// Output silence from the next callback on
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Streams the renderer held after its last callback
    pub fn stream_count(&self) -> usize {
        self.shared.streams.load(Ordering::Relaxed)
    }

    pub fn callbacks(&self) -> u64 {
        self.shared.callbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::capture_ring;
    use crate::audio::ring::decode_ring;
    use crate::constants::BLOCK_SAMPLES;

    fn prime(writer: &crate::audio::ring::RingWriter, value: f32) {
        while let Some(index) = writer.next_request() {
            let mut block = writer.take_block(index);
            block.samples.fill(value);
            writer.write(block);
        }
    }

    #[test]
    fn test_mixes_streams() {
        let (handle, mut renderer) = renderer(4);
        let (writer_a, reader_a) = decode_ring(1, 2);
        let (writer_b, reader_b) = decode_ring(2, 2);
        prime(&writer_a, 0.25);
        prime(&writer_b, 0.5);
        handle.add_stream(reader_a).unwrap();
        handle.add_stream(reader_b).unwrap();

        let input = vec![0.0; BLOCK_SAMPLES];
        let mut output = vec![0.0; BLOCK_SAMPLES];
        renderer.process(&input, &mut output);

        assert_eq!(renderer.stream_count(), 2);
        assert_eq!(handle.stream_count(), 2);
        assert!(output.iter().all(|s| (*s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_remove_stream_goes_to_garbage() {
        let (handle, mut renderer) = renderer(4);
        let (_writer, reader) = decode_ring(1, 2);
        handle.add_stream(reader).unwrap();

        let mut output = vec![0.0; 64];
        renderer.process(&[], &mut output);
        handle.remove_stream(1).unwrap();
        renderer.process(&[], &mut output);

        assert_eq!(renderer.stream_count(), 0);
        assert_eq!(handle.collect_garbage(), 1);
    }

    #[test]
    fn test_garbage_collected_on_send() {
        let (handle, mut renderer) = renderer(1);
        let mut output = vec![0.0; 64];

        for media_id in 0..(COMMAND_CAPACITY as u64 * 4) {
            let (_writer, reader) = decode_ring(media_id, 2);
            handle.add_stream(reader).unwrap();
            renderer.process(&[], &mut output);
            handle.remove_stream(media_id).unwrap();
            renderer.process(&[], &mut output);
        }

        assert_eq!(renderer.stream_count(), 0);
        assert_eq!(handle.collect_garbage(), 1);
    }

    #[test]
    fn test_capture_fed_from_input() {
        let (handle, mut renderer) = renderer(1);
        let (writer, reader) = capture_ring(1, 3);
        handle.attach_capture(writer).unwrap();

        let input = vec![0.3; BLOCK_SAMPLES];
        let mut output = vec![0.0; BLOCK_SAMPLES];
        renderer.process(&input, &mut output);

        let block = reader.pop().unwrap();
        assert!((block.samples[10] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_detach_capture_matches_media() {
        let (handle, mut renderer) = renderer(1);
        let (writer, reader) = capture_ring(2, 3);
        handle.attach_capture(writer).unwrap();

        let input = vec![0.3; BLOCK_SAMPLES];
        let mut output = vec![0.0; BLOCK_SAMPLES];
        handle.detach_capture(1).unwrap();
        renderer.process(&input, &mut output);
        assert!(reader.pop().is_some());

        handle.detach_capture(2).unwrap();
        renderer.process(&input, &mut output);
        assert!(reader.pop().is_none());
        assert_eq!(handle.collect_garbage(), 1);
    }

    #[test]
    fn test_stopped_renderer_outputs_silence() {
        let (handle, mut renderer) = renderer(1);
        let (writer, reader) = decode_ring(1, 2);
        prime(&writer, 0.5);
        handle.add_stream(reader).unwrap();
        handle.stop();

        let mut output = vec![1.0; 32];
        renderer.process(&[], &mut output);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(handle.remove_stream(1), Err(AudioError::Stopped));
    }

    #[test]
    fn test_master_gain_and_clamp() {
        let (handle, mut renderer) = renderer(2);
        let (writer, reader) = decode_ring(1, 2);
        prime(&writer, 0.8);
        handle.add_stream(reader).unwrap();
        handle.set_gain(None, 2.0).unwrap();

        let mut output = vec![0.0; 16];
        renderer.process(&[], &mut output);
        assert!(output.iter().all(|s| *s == 1.0));
    }
}
