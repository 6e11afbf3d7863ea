//! Document-store wire protocol.
//!
//! This module decodes and encodes the legacy, opcode-tagged message format spoken between
//! drivers and the document store. Every unit on the wire is a *frame*: a fixed 16-byte
//! [`Header`] immediately followed by an opcode-specific payload.
//!
//! # Binary Format
//!
//! - All multi-byte integers are little-endian.
//! - Strings are null-terminated UTF-8 (C-strings).
//! - Documents are length-prefixed BSON; the prefix counts its own four bytes.
//!
//! # Key Components
//!
//! - [`codec`]: Stateless helpers reading and writing the primitive field types.
//! - [`Header`]: The frame preamble.
//! - [`WireMessage`]: Trait implemented by every typed payload.
//! - [`Message`]: Closed set of decoded payloads handed to the dispatcher.
//! - [`Frame`]: Header plus the raw bytes of one complete frame, as read off a socket.
//!
//! # See Also
//!
//! - [`proxy`](crate::proxy): Reads frames from live connections and decides what to do with them.
pub mod codec;
mod command;
mod frame;
mod header;
mod query;
mod reply;

use std::{
    fmt,
    io::{BufRead, Cursor, Write},
};

pub use command::{CommandMessage, CommandReplyMessage};
pub use error::{CodecError, WireError};
pub use frame::{Frame, MAX_MESSAGE_SIZE, encode_frame, read_frame};
pub use header::{HEADER_SIZE, Header};
pub use query::{QueryFlags, QueryMessage};
pub use reply::{ReplyFlags, ReplyMessage};

pub mod error {
    use std::{io, string::FromUtf8Error};

    use thiserror::Error;

    /// Failures of the primitive field readers and writers.
    #[derive(Debug, Error)]
    pub enum CodecError {
        #[error("truncated input while reading {0}")]
        TruncatedInput(&'static str),

        #[error("malformed document: {0}")]
        MalformedDocument(#[from] bson::de::Error),

        #[error("invalid document length {0}")]
        DocumentLength(i64),

        #[error("invalid utf-8 in string: {0}")]
        InvalidString(#[from] FromUtf8Error),

        #[error("failed to encode document: {0}")]
        Encode(#[from] bson::ser::Error),

        #[error("io error: {0}")]
        Io(io::Error),
    }

    impl From<io::Error> for CodecError {
        fn from(value: io::Error) -> Self {
            if value.kind() == io::ErrorKind::UnexpectedEof {
                CodecError::TruncatedInput("stream")
            } else {
                CodecError::Io(value)
            }
        }
    }

    #[derive(Debug, Error)]
    pub enum WireError {
        #[error("failed to read {field}: {source}")]
        Read {
            field: &'static str,
            source: CodecError,
        },

        #[error("failed to write {field}: {source}")]
        Write {
            field: &'static str,
            source: CodecError,
        },

        #[error("unsupported opcode {0}")]
        UnsupportedOpcode(i32),

        #[error("invalid frame length {0}")]
        FrameLength(i32),
    }

    impl WireError {
        /// True when the input ended before a declared length was satisfied.
        pub fn is_truncated(&self) -> bool {
            matches!(
                self,
                WireError::Read {
                    source: CodecError::TruncatedInput(_),
                    ..
                }
            )
        }

        /// True when the underlying stream failed, as opposed to the bytes being wrong.
        pub fn is_transport(&self) -> bool {
            matches!(
                self,
                WireError::Read {
                    source: CodecError::Io(_),
                    ..
                } | WireError::Write {
                    source: CodecError::Io(_),
                    ..
                }
            )
        }
    }

    /// Attaches the name of the field being processed to a codec failure.
    pub(crate) trait FieldContext<T> {
        fn reading(self, field: &'static str) -> Result<T, WireError>;
        fn writing(self, field: &'static str) -> Result<T, WireError>;
    }

    impl<T, E: Into<CodecError>> FieldContext<T> for Result<T, E> {
        fn reading(self, field: &'static str) -> Result<T, WireError> {
            self.map_err(|e| WireError::Read {
                field,
                source: e.into(),
            })
        }

        fn writing(self, field: &'static str) -> Result<T, WireError> {
            self.map_err(|e| WireError::Write {
                field,
                source: e.into(),
            })
        }
    }
}

/// Message opcodes of the legacy wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    /// Reply to a client request; `responseTo` is set.
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    /// Formerly OP_GET_BY_OID.
    Reserved = 2003,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
    /// Cluster internal command request.
    Command = 2010,
    /// Cluster internal reply to [`Opcode::Command`].
    CommandReply = 2011,
}

impl TryFrom<i32> for Opcode {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::Reply),
            2001 => Ok(Opcode::Update),
            2002 => Ok(Opcode::Insert),
            2003 => Ok(Opcode::Reserved),
            2004 => Ok(Opcode::Query),
            2005 => Ok(Opcode::GetMore),
            2006 => Ok(Opcode::Delete),
            2007 => Ok(Opcode::KillCursors),
            2010 => Ok(Opcode::Command),
            2011 => Ok(Opcode::CommandReply),
            other => Err(WireError::UnsupportedOpcode(other)),
        }
    }
}

impl From<Opcode> for i32 {
    fn from(value: Opcode) -> Self {
        value as i32
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Reply => "REPLY",
            Opcode::Update => "UPDATE",
            Opcode::Insert => "INSERT",
            Opcode::Reserved => "RESERVED",
            Opcode::Query => "QUERY",
            Opcode::GetMore => "GET_MORE",
            Opcode::Delete => "DELETE",
            Opcode::KillCursors => "KILL_CURSORS",
            Opcode::Command => "COMMAND",
            Opcode::CommandReply => "COMMANDREPLY",
        };
        f.write_str(name)
    }
}

/// A typed payload that knows how to decode, encode and size itself.
pub trait WireMessage: Sized {
    const OPCODE: Opcode;

    /// Decodes the payload from `source`, which must be positioned just after the header.
    ///
    /// Optional trailing fields are decoded only when `source` still has bytes left.
    fn read_from<R: BufRead>(source: &mut R) -> Result<Self, WireError>;

    /// Encodes the payload (header excluded) and returns the number of bytes written.
    fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError>;

    /// Payload length in bytes, header excluded.
    fn encoded_size(&self) -> Result<usize, WireError>;

    fn opcode(&self) -> Opcode {
        Self::OPCODE
    }
}

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Query(QueryMessage),
    Reply(ReplyMessage),
    Command(CommandMessage),
    CommandReply(CommandReplyMessage),
    /// A known opcode whose body is never inspected.
    Opaque(Opcode),
    /// An opcode outside the known set.
    Unsupported(i32),
}

impl Message {
    /// Decodes the payload described by `header` from `payload`.
    ///
    /// Unknown opcodes are not an error here; they decode to [`Message::Unsupported`] and
    /// are rejected by the dispatcher.
    pub fn decode(header: &Header, payload: &[u8]) -> Result<Self, WireError> {
        let opcode = match Opcode::try_from(header.opcode) {
            Ok(opcode) => opcode,
            Err(_) => return Ok(Message::Unsupported(header.opcode)),
        };

        let mut source = Cursor::new(payload);
        let message = match opcode {
            Opcode::Query => Message::Query(QueryMessage::read_from(&mut source)?),
            Opcode::Reply => Message::Reply(ReplyMessage::read_from(&mut source)?),
            Opcode::Command => Message::Command(CommandMessage::read_from(&mut source)?),
            Opcode::CommandReply => {
                Message::CommandReply(CommandReplyMessage::read_from(&mut source)?)
            }
            other => Message::Opaque(other),
        };
        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Query(query) => write!(f, "{query}"),
            Message::Reply(reply) => write!(f, "{reply}"),
            Message::Command(command) => write!(f, "{command}"),
            Message::CommandReply(reply) => write!(f, "{reply}"),
            Message::Opaque(opcode) => write!(f, "<{opcode} (not inspected)>"),
            Message::Unsupported(opcode) => write!(f, "<unsupported opcode {opcode}>"),
        }
    }
}
