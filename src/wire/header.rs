use std::{
    fmt,
    io::{Read, Write},
};

use super::{
    Opcode, WireError, WireMessage,
    codec::{read_i32, write_i32},
    error::FieldContext,
    frame::MAX_MESSAGE_SIZE,
};

pub const HEADER_SIZE: usize = 16;

/// Fixed 16-byte frame preamble.
///
/// The opcode is kept as the raw wire value; validating it is the dispatcher's job, so a
/// frame with an unknown opcode can still be read and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub opcode: i32,
}

impl Header {
    /// Builds the header for an outgoing message; the total length always covers the
    /// header plus the message's encoded payload.
    pub fn for_message<M: WireMessage>(
        message: &M,
        request_id: i32,
        response_to: i32,
    ) -> Result<Self, WireError> {
        let size = HEADER_SIZE + message.encoded_size()?;
        if size > MAX_MESSAGE_SIZE {
            return Err(WireError::FrameLength(i32::try_from(size).unwrap_or(i32::MAX)));
        }

        Ok(Self {
            total_length: size as i32,
            request_id,
            response_to,
            opcode: message.opcode().into(),
        })
    }

    pub fn read_from<R: Read>(source: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            total_length: read_i32(source).reading("totalLength")?,
            request_id: read_i32(source).reading("requestId")?,
            response_to: read_i32(source).reading("responseTo")?,
            opcode: read_i32(source).reading("opcode")?,
        })
    }

    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError> {
        write_i32(sink, self.total_length).writing("totalLength")?;
        write_i32(sink, self.request_id).writing("requestId")?;
        write_i32(sink, self.response_to).writing("responseTo")?;
        write_i32(sink, self.opcode).writing("opcode")?;
        Ok(HEADER_SIZE)
    }

    pub fn opcode(&self) -> Result<Opcode, WireError> {
        Opcode::try_from(self.opcode)
    }

    /// Number of payload bytes the header declares.
    pub fn payload_length(&self) -> Result<usize, WireError> {
        let total = usize::try_from(self.total_length)
            .map_err(|_| WireError::FrameLength(self.total_length))?;
        if !(HEADER_SIZE..=MAX_MESSAGE_SIZE).contains(&total) {
            return Err(WireError::FrameLength(self.total_length));
        }
        Ok(total - HEADER_SIZE)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = match Opcode::try_from(self.opcode) {
            Ok(opcode) => opcode.to_string(),
            Err(_) => self.opcode.to_string(),
        };
        write!(
            f,
            "<Header totalLength={} requestId={} responseTo={} opcode={}>",
            self.total_length, self.request_id, self.response_to, opcode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = Header {
            total_length: 0x24,
            request_id: 0x0102,
            response_to: -1,
            opcode: 2004,
        };
        let mut out = Vec::new();
        assert_eq!(header.write_to(&mut out).unwrap(), HEADER_SIZE);

        assert_eq!(
            out,
            vec![
                0x24, 0, 0, 0, 0x02, 0x01, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xd4, 0x07, 0, 0
            ]
        );
        assert_eq!(Header::read_from(&mut out.as_slice()).unwrap(), header);
    }

    #[test]
    fn header_read_does_not_validate_opcode() {
        let mut raw = Vec::new();
        for value in [16i32, 1, 0, 9999] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let header = Header::read_from(&mut raw.as_slice()).unwrap();

        assert_eq!(header.opcode, 9999);
        assert!(matches!(
            header.opcode(),
            Err(WireError::UnsupportedOpcode(9999))
        ));
    }

    #[test]
    fn header_short_read() {
        let raw = [16u8, 0, 0, 0, 1, 0];
        let err = Header::read_from(&mut &raw[..]).unwrap_err();
        assert!(err.is_truncated());
        assert!(err.to_string().contains("requestId"), "{err}");
    }

    #[test]
    fn payload_length_bounds() {
        let mut header = Header {
            total_length: 16,
            request_id: 0,
            response_to: 0,
            opcode: 1,
        };
        assert_eq!(header.payload_length().unwrap(), 0);

        header.total_length = 15;
        assert!(matches!(
            header.payload_length(),
            Err(WireError::FrameLength(15))
        ));

        header.total_length = -4;
        assert!(header.payload_length().is_err());
    }
}
