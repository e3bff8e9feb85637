//! MessagePack-RPC wire codec
//!
//! Three envelope shapes travel over a length-prefixed binary channel:
//!
//! ```text
//! [0, id, method, params]          request
//! [1, id, error|nil, result|nil]   response
//! [2, method, params]              notification
//! ```
//!
//! Each envelope is one MessagePack array, framed with a 4-byte big-endian
//! length prefix (see [`framing`]).

pub mod framing;
pub mod message;
pub mod value;

pub use framing::{read_frame, write_frame};
pub use message::{decode_message, encode_message, RpcMessage};
pub use value::{from_value, to_value, Value};

/// Maximum encoded frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
