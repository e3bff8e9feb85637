//! Audio block exchange between the codec context and the real-time renderer

pub mod buffer;
pub mod capture;
pub mod renderer;
pub mod ring;

pub use buffer::{AudioBlock, BlockQueue};
pub use capture::{capture_ring, CaptureReader, CaptureWriter};
pub use renderer::{renderer, Renderer, RendererCommand, RendererHandle};
pub use ring::{decode_ring, RingReader, RingWriter};
