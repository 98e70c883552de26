//! Wire protocol between the dispatch authority and its observers.
//!
//! # Modules
//!
//! - [`codec`] -- Newline-delimited frames over byte buffers and async streams.
//! - [`message`] -- The closed [`Message`] envelope.
//! - [`mirror`] -- Observer-side copy of the World Model.
//! - [`history`] -- Bounded history ring.
//! - [`error`] -- Framing, protocol and transport errors.

pub mod codec;
pub mod error;
pub mod history;
pub mod message;
pub mod mirror;

pub use codec::{
    DEFAULT_MAX_FRAME_LEN, FrameDecoder, FramedReader, FramedWriter, decode_line, encode_line,
    encode_text, parse_frame,
};
pub use error::{DecodeError, EncodeError, FramingError, ProtocolError, SendError};
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryLog};
pub use message::{HistoryBatch, KINDS, Message};
pub use mirror::{Applied, DropReason, Mirror, StalePolicy};
