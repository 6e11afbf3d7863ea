use std::{
    fmt,
    io::{BufRead, Write},
    ops::BitOr,
};

use bson::Document;

use super::{
    Opcode, WireError, WireMessage,
    codec::{
        document_size, read_document, read_i32, read_i64, read_u32, write_document, write_i32,
        write_i64, write_u32,
    },
    error::FieldContext,
};

/// OP_REPLY flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReplyFlags(pub u32);

impl ReplyFlags {
    pub const CURSOR_NOT_FOUND: ReplyFlags = ReplyFlags(1 << 0);
    pub const QUERY_FAILURE: ReplyFlags = ReplyFlags(1 << 1);
    pub const SHARD_CONFIG_STALE: ReplyFlags = ReplyFlags(1 << 2);
    pub const AWAIT_CAPABLE: ReplyFlags = ReplyFlags(1 << 3);

    const NAMES: [(ReplyFlags, &'static str); 4] = [
        (Self::CURSOR_NOT_FOUND, "cursorNotFound"),
        (Self::QUERY_FAILURE, "queryFailure"),
        (Self::SHARD_CONFIG_STALE, "shardConfigStale"),
        (Self::AWAIT_CAPABLE, "awaitCapable"),
    ];

    pub const fn empty() -> Self {
        ReplyFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ReplyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ReplyFlags {
    type Output = ReplyFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ReplyFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for ReplyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        write!(f, "[{}]", names.join(", "))
    }
}

/// OP_REPLY payload.
///
/// The documents field is mandatory: unlike the query selector, a reply with no bytes
/// left for it is truncated, not empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Document,
}

impl ReplyMessage {
    /// A reply carrying exactly one document and no cursor.
    pub fn single(flags: ReplyFlags, document: Document) -> Self {
        Self {
            flags,
            cursor_id: 0,
            starting_from: 0,
            number_returned: 1,
            documents: document,
        }
    }
}

impl WireMessage for ReplyMessage {
    const OPCODE: Opcode = Opcode::Reply;

    fn read_from<R: BufRead>(source: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            flags: ReplyFlags(read_u32(source).reading("flags")?),
            cursor_id: read_i64(source).reading("cursorId")?,
            starting_from: read_i32(source).reading("startingFrom")?,
            number_returned: read_i32(source).reading("numberReturned")?,
            documents: read_document(source).reading("documents")?,
        })
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError> {
        let mut n = write_u32(sink, self.flags.bits()).writing("flags")?;
        n += write_i64(sink, self.cursor_id).writing("cursorId")?;
        n += write_i32(sink, self.starting_from).writing("startingFrom")?;
        n += write_i32(sink, self.number_returned).writing("numberReturned")?;
        n += write_document(sink, &self.documents).writing("documents")?;
        Ok(n)
    }

    fn encoded_size(&self) -> Result<usize, WireError> {
        // flags, cursorId, startingFrom, numberReturned
        Ok(4 + 8 + 4 + 4 + document_size(&self.documents).writing("documents")?)
    }
}

impl fmt::Display for ReplyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Reply cursorId={} startingFrom={} numberReturned={} documents={} flags={}>",
            self.cursor_id, self.starting_from, self.number_returned, self.documents, self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bson::doc;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn reply_without_documents_is_truncated() {
        let mut out = Vec::new();
        write_u32(&mut out, 0).unwrap();
        write_i64(&mut out, 0).unwrap();
        write_i32(&mut out, 0).unwrap();
        write_i32(&mut out, 0).unwrap();

        let err = ReplyMessage::read_from(&mut Cursor::new(out)).unwrap_err();
        assert!(err.is_truncated());
        assert!(err.to_string().contains("documents"), "{err}");
    }

    #[test]
    fn reply_single_document() {
        let reply = ReplyMessage::single(ReplyFlags::SHARD_CONFIG_STALE, doc! { "ok": 1 });
        assert_eq!(reply.cursor_id, 0);
        assert_eq!(reply.number_returned, 1);
        assert_eq!(reply.flags.bits(), 4);
        assert_eq!(reply.encoded_size().unwrap(), 20 + 13);
    }

    #[test]
    fn reply_flags_display() {
        let flags = ReplyFlags::QUERY_FAILURE | ReplyFlags::AWAIT_CAPABLE;
        assert_eq!(flags.to_string(), "[queryFailure, awaitCapable]");
    }

    proptest! {
        #[test]
        fn reply_roundtrips_field_for_field(
            flags in any::<u32>(),
            cursor_id in any::<i64>(),
            starting_from in any::<i32>(),
            number_returned in any::<i32>(),
            key in "[a-z]{1,12}",
            value in any::<i64>(),
        ) {
            let mut documents = Document::new();
            documents.insert(key, value);
            documents.insert("ok", 1.0);

            let reply = ReplyMessage {
                flags: ReplyFlags(flags),
                cursor_id,
                starting_from,
                number_returned,
                documents,
            };
            let mut out = Vec::new();
            let n = reply.write_to(&mut out).unwrap();
            prop_assert_eq!(n, reply.encoded_size().unwrap());

            let decoded = ReplyMessage::read_from(&mut Cursor::new(out)).unwrap();
            prop_assert_eq!(decoded, reply);
        }
    }
}
