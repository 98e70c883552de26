//! Error types for framing, decoding and sending.

/// A line that could not be turned into structured text.
///
/// The stream continues after a framing error; only the offending line is
/// lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The line is not well-formed JSON.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// The line as received.
        raw: String,
        /// Parser message.
        reason: String,
    },

    /// The line is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8 {
        /// The line with invalid sequences replaced.
        raw: String,
    },

    /// The line exceeds the configured limit and was discarded.
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    Oversized {
        /// Bytes seen before discarding.
        len: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl FramingError {
    /// The offending line, when one is available.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Malformed { raw, .. } | Self::InvalidUtf8 { raw } => Some(raw),
            Self::Oversized { .. } => None,
        }
    }
}

/// A well-formed frame that is not an acceptable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// No string `type` field.
    #[error("message has no type")]
    MissingKind,

    /// A `type` this protocol does not define.
    #[error("unknown message type {kind:?}")]
    UnknownKind {
        /// The received `type`.
        kind: String,
    },

    /// A known `type` whose fields do not match it.
    #[error("invalid {kind} message: {reason}")]
    InvalidFields {
        /// The message kind.
        kind: &'static str,
        /// Deserializer message.
        reason: String,
    },

    /// A valid message sent in the wrong direction.
    #[error("{kind} messages are not accepted from {from}")]
    UnexpectedKind {
        /// The message kind.
        kind: &'static str,
        /// Who sent it.
        from: &'static str,
    },
}

/// Either failure of turning a line into a [`crate::Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The line is not structured text.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The structured text is not an acceptable message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Failure to serialize a message.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode message: {source}")]
pub struct EncodeError {
    /// The underlying serializer error.
    #[from]
    source: serde_json::Error,
}

/// Failure to write a message to a stream.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The stream rejected the bytes.
    #[error("stream write failed: {0}")]
    Io(#[from] std::io::Error),
}
