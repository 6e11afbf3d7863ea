use std::io::{self, Read};

use super::{
    HEADER_SIZE, Header, Message, WireError, WireMessage, codec::read_i32, error::FieldContext,
};

/// Largest frame accepted in either direction; matches the `maxMessageSizeBytes`
/// advertised during negotiation.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// One complete frame as it arrived: the parsed header and every raw byte, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn message(&self) -> Result<Message, WireError> {
        Message::decode(&self.header, self.payload())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reads exactly one frame from `source`.
///
/// Returns `Ok(None)` if the stream ends cleanly on a frame boundary. A stream that ends
/// anywhere else is truncated input; the frame is only returned once every byte its
/// header declares has arrived.
pub fn read_frame<R: Read>(source: &mut R) -> Result<Option<Frame>, WireError> {
    let mut head = [0u8; HEADER_SIZE];
    let mut filled = 0;

    while filled < HEADER_SIZE {
        match source.read(&mut head[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof)).reading("header");
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).reading("header"),
        }
    }

    let header = Header::read_from(&mut &head[..])?;
    let length = header.payload_length()?;

    let mut bytes = vec![0u8; HEADER_SIZE + length];
    bytes[..HEADER_SIZE].copy_from_slice(&head);
    source.read_exact(&mut bytes[HEADER_SIZE..]).reading("payload")?;

    Ok(Some(Frame { header, bytes }))
}

/// Serialises `message` behind a freshly computed header.
pub fn encode_frame<M: WireMessage>(
    message: &M,
    request_id: i32,
    response_to: i32,
) -> Result<Vec<u8>, WireError> {
    let header = Header::for_message(message, request_id, response_to)?;
    let mut out = Vec::with_capacity(header.total_length as usize);
    header.write_to(&mut out)?;
    message.write_to(&mut out)?;

    // A mismatch here means a message type mis-reports its own size.
    let declared = read_i32(&mut &out[..4]).reading("totalLength")?;
    if declared as usize != out.len() {
        return Err(WireError::FrameLength(declared));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bson::doc;

    use super::*;
    use crate::wire::{
        CommandMessage, CommandReplyMessage, Opcode, QueryFlags, QueryMessage, ReplyFlags,
        ReplyMessage,
    };

    fn assert_consistent<M: WireMessage>(message: &M) {
        let bytes = encode_frame(message, 3, 2).unwrap();
        let header = Header::read_from(&mut &bytes[..]).unwrap();

        assert_eq!(
            header.total_length as usize,
            HEADER_SIZE + message.encoded_size().unwrap()
        );
        assert_eq!(header.total_length as usize, bytes.len());
        assert_eq!(header.opcode, i32::from(M::OPCODE));
    }

    #[test]
    fn header_length_matches_every_typed_opcode() {
        assert_consistent(&QueryMessage {
            flags: QueryFlags::empty(),
            namespace: "mydb.$cmd".into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "find": "widgets" },
            selector: Some(doc! { "name": 1 }),
        });
        assert_consistent(&ReplyMessage {
            flags: ReplyFlags::AWAIT_CAPABLE,
            cursor_id: 0,
            starting_from: 0,
            number_returned: 1,
            documents: doc! { "ok": 1 },
        });
        assert_consistent(&CommandMessage {
            database: "admin".into(),
            command_name: "ping".into(),
            metadata: doc! {},
            args: doc! { "ping": 1 },
            input_docs: None,
        });
        assert_consistent(&CommandReplyMessage {
            metadata: doc! {},
            reply: doc! { "ok": 1 },
            output_docs: Some(doc! { "n": 0 }),
        });
    }

    #[test]
    fn read_frame_returns_whole_frame() {
        let reply = ReplyMessage::single(ReplyFlags::empty(), doc! { "ok": 1 });
        let mut bytes = encode_frame(&reply, 9, 4).unwrap();
        let first = bytes.len();
        bytes.extend(encode_frame(&reply, 10, 5).unwrap());

        let mut source = Cursor::new(bytes);
        let frame = read_frame(&mut source).unwrap().unwrap();
        assert_eq!(frame.len(), first);
        assert_eq!(frame.header.request_id, 9);
        assert_eq!(frame.header.opcode().unwrap(), Opcode::Reply);
        assert_eq!(frame.message().unwrap(), crate::wire::Message::Reply(reply));

        let second = read_frame(&mut source).unwrap().unwrap();
        assert_eq!(second.header.response_to, 5);
        assert!(read_frame(&mut source).unwrap().is_none());
    }

    #[test]
    fn read_frame_truncated_payload() {
        let reply = ReplyMessage::single(ReplyFlags::empty(), doc! { "ok": 1 });
        let bytes = encode_frame(&reply, 1, 0).unwrap();

        let err = read_frame(&mut &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn read_frame_truncated_header() {
        let err = read_frame(&mut &[0x20u8, 0, 0][..]).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn read_frame_rejects_oversized_length() {
        let mut raw = Vec::new();
        for value in [i32::MAX, 1, 0, 2004] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let err = read_frame(&mut raw.as_slice()).unwrap_err();
        assert!(matches!(err, WireError::FrameLength(i32::MAX)));
    }
}
