use std::{
    fmt,
    io::{BufRead, Write},
    ops::BitOr,
};

use bson::Document;

use super::{
    Opcode, WireError, WireMessage,
    codec::{
        cstring_size, document_size, has_remaining, read_cstring, read_document, read_i32,
        read_u32, write_cstring, write_document, write_i32, write_u32,
    },
    error::FieldContext,
};

/// Suffix of the pseudo-collection command queries are addressed to.
pub const COMMAND_COLLECTION: &str = "$cmd";

/// OP_QUERY flag bits. Bit 0 is reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFlags(pub u32);

impl QueryFlags {
    pub const TAILABLE: QueryFlags = QueryFlags(1 << 1);
    pub const SLAVE_OK: QueryFlags = QueryFlags(1 << 2);
    pub const OPLOG_REPLAY: QueryFlags = QueryFlags(1 << 3);
    pub const NO_CURSOR_TIMEOUT: QueryFlags = QueryFlags(1 << 4);
    pub const AWAIT_DATA: QueryFlags = QueryFlags(1 << 5);
    pub const EXHAUST: QueryFlags = QueryFlags(1 << 6);
    pub const PARTIAL: QueryFlags = QueryFlags(1 << 7);

    const NAMES: [(QueryFlags, &'static str); 7] = [
        (Self::TAILABLE, "tailable"),
        (Self::SLAVE_OK, "slaveOk"),
        (Self::OPLOG_REPLAY, "oplogReplay"),
        (Self::NO_CURSOR_TIMEOUT, "noCursorTimeout"),
        (Self::AWAIT_DATA, "awaitData"),
        (Self::EXHAUST, "exhaust"),
        (Self::PARTIAL, "partial"),
    ];

    pub const fn empty() -> Self {
        QueryFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        QueryFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for QueryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        write!(f, "[{}]", names.join(", "))
    }
}

/// OP_QUERY payload.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMessage {
    pub flags: QueryFlags,
    /// Full "database.collection" name.
    pub namespace: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    /// Field selector; absent when the frame carries no bytes for it.
    pub selector: Option<Document>,
}

impl QueryMessage {
    /// Database portion of the namespace: everything before the first '.'.
    pub fn database(&self) -> &str {
        self.namespace
            .split_once('.')
            .map_or(self.namespace.as_str(), |(db, _)| db)
    }

    /// Collection portion of the namespace; empty if there is no '.'.
    pub fn collection(&self) -> &str {
        self.namespace.split_once('.').map_or("", |(_, coll)| coll)
    }

    /// Command-style queries address the `<db>.$cmd` pseudo-collection.
    pub fn is_command(&self) -> bool {
        self.namespace
            .strip_suffix(COMMAND_COLLECTION)
            .is_some_and(|rest| rest.ends_with('.'))
    }

    /// The command verb, which is always the first key of a command query.
    pub fn command_name(&self) -> Option<&str> {
        self.query.keys().next().map(String::as_str)
    }
}

impl WireMessage for QueryMessage {
    const OPCODE: Opcode = Opcode::Query;

    fn read_from<R: BufRead>(source: &mut R) -> Result<Self, WireError> {
        let flags = QueryFlags(read_u32(source).reading("flags")?);
        let namespace = read_cstring(source).reading("namespace")?;
        let number_to_skip = read_i32(source).reading("numberToSkip")?;
        let number_to_return = read_i32(source).reading("numberToReturn")?;
        let query = read_document(source).reading("query")?;

        let selector = if has_remaining(source).reading("selector")? {
            Some(read_document(source).reading("selector")?)
        } else {
            None
        };

        Ok(Self {
            flags,
            namespace,
            number_to_skip,
            number_to_return,
            query,
            selector,
        })
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError> {
        let mut n = write_u32(sink, self.flags.bits()).writing("flags")?;
        n += write_cstring(sink, &self.namespace).writing("namespace")?;
        n += write_i32(sink, self.number_to_skip).writing("numberToSkip")?;
        n += write_i32(sink, self.number_to_return).writing("numberToReturn")?;
        n += write_document(sink, &self.query).writing("query")?;
        if let Some(selector) = &self.selector {
            n += write_document(sink, selector).writing("selector")?;
        }
        Ok(n)
    }

    fn encoded_size(&self) -> Result<usize, WireError> {
        let mut size = 4 + cstring_size(&self.namespace) + 4 + 4;
        size += document_size(&self.query).writing("query")?;
        if let Some(selector) = &self.selector {
            size += document_size(selector).writing("selector")?;
        }
        Ok(size)
    }
}

impl fmt::Display for QueryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Query namespace={} skip={} limit={} query={}",
            self.namespace, self.number_to_skip, self.number_to_return, self.query
        )?;
        if let Some(selector) = &self.selector {
            write!(f, " selector={selector}")?;
        }
        write!(f, " flags={}>", self.flags)
    }
}
