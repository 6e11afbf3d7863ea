use std::{
    fmt,
    io::{BufRead, Write},
};

use bson::Document;

use super::{
    Opcode, WireError, WireMessage,
    codec::{
        cstring_size, document_size, has_remaining, read_cstring, read_document, write_cstring,
        write_document,
    },
    error::FieldContext,
};

/// OP_COMMAND payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub database: String,
    pub command_name: String,
    pub metadata: Document,
    pub args: Document,
    pub input_docs: Option<Document>,
}

/// OP_COMMANDREPLY payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReplyMessage {
    pub metadata: Document,
    pub reply: Document,
    pub output_docs: Option<Document>,
}

fn read_trailing<R: BufRead>(
    source: &mut R,
    field: &'static str,
) -> Result<Option<Document>, WireError> {
    if has_remaining(source).reading(field)? {
        Ok(Some(read_document(source).reading(field)?))
    } else {
        Ok(None)
    }
}

fn trailing_size(doc: &Option<Document>, field: &'static str) -> Result<usize, WireError> {
    match doc {
        Some(doc) => document_size(doc).writing(field),
        None => Ok(0),
    }
}

impl WireMessage for CommandMessage {
    const OPCODE: Opcode = Opcode::Command;

    fn read_from<R: BufRead>(source: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            database: read_cstring(source).reading("database")?,
            command_name: read_cstring(source).reading("commandName")?,
            metadata: read_document(source).reading("metadata")?,
            args: read_document(source).reading("commandArgs")?,
            input_docs: read_trailing(source, "inputDocs")?,
        })
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError> {
        let mut n = write_cstring(sink, &self.database).writing("database")?;
        n += write_cstring(sink, &self.command_name).writing("commandName")?;
        n += write_document(sink, &self.metadata).writing("metadata")?;
        n += write_document(sink, &self.args).writing("commandArgs")?;
        if let Some(input) = &self.input_docs {
            n += write_document(sink, input).writing("inputDocs")?;
        }
        Ok(n)
    }

    fn encoded_size(&self) -> Result<usize, WireError> {
        Ok(cstring_size(&self.database)
            + cstring_size(&self.command_name)
            + document_size(&self.metadata).writing("metadata")?
            + document_size(&self.args).writing("commandArgs")?
            + trailing_size(&self.input_docs, "inputDocs")?)
    }
}

impl WireMessage for CommandReplyMessage {
    const OPCODE: Opcode = Opcode::CommandReply;

    fn read_from<R: BufRead>(source: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            metadata: read_document(source).reading("metadata")?,
            reply: read_document(source).reading("commandReply")?,
            output_docs: read_trailing(source, "outputDocs")?,
        })
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> Result<usize, WireError> {
        let mut n = write_document(sink, &self.metadata).writing("metadata")?;
        n += write_document(sink, &self.reply).writing("commandReply")?;
        if let Some(output) = &self.output_docs {
            n += write_document(sink, output).writing("outputDocs")?;
        }
        Ok(n)
    }

    fn encoded_size(&self) -> Result<usize, WireError> {
        Ok(document_size(&self.metadata).writing("metadata")?
            + document_size(&self.reply).writing("commandReply")?
            + trailing_size(&self.output_docs, "outputDocs")?)
    }
}

impl fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Command database={:?} command={:?} metadata={} args={}",
            self.database, self.command_name, self.metadata, self.args
        )?;
        if let Some(input) = &self.input_docs {
            write!(f, " inputDocs={input}")?;
        }
        f.write_str(">")
    }
}

impl fmt::Display for CommandReplyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CommandReply metadata={} reply={}",
            self.metadata, self.reply
        )?;
        if let Some(output) = &self.output_docs {
            write!(f, " outputDocs={output}")?;
        }
        f.write_str(">")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bson::doc;

    use super::*;

    #[test]
    fn command_without_input_docs() {
        let command = CommandMessage {
            database: "test".into(),
            command_name: "insert".into(),
            metadata: doc! {},
            args: doc! { "insert": "people", "ordered": true },
            input_docs: None,
        };
        let mut out = Vec::new();
        command.write_to(&mut out).unwrap();

        let decoded = CommandMessage::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(decoded.input_docs, None);
        assert_eq!(decoded, command);
    }

    #[test]
    fn command_with_input_docs() {
        let command = CommandMessage {
            database: "test".into(),
            command_name: "insert".into(),
            metadata: doc! { "$replData": 1 },
            args: doc! { "insert": "people" },
            input_docs: Some(doc! { "name": "Ale" }),
        };
        let mut out = Vec::new();
        let n = command.write_to(&mut out).unwrap();
        assert_eq!(n, command.encoded_size().unwrap());

        let decoded = CommandMessage::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn command_missing_args_names_field() {
        let mut out = Vec::new();
        write_cstring(&mut out, "test").unwrap();
        write_cstring(&mut out, "ping").unwrap();
        write_document(&mut out, &doc! {}).unwrap();

        let err = CommandMessage::read_from(&mut Cursor::new(out)).unwrap_err();
        assert!(err.to_string().contains("commandArgs"), "{err}");
    }

    #[test]
    fn command_reply_optional_output() {
        let reply = CommandReplyMessage {
            metadata: doc! {},
            reply: doc! { "ok": 1 },
            output_docs: None,
        };
        let mut out = Vec::new();
        reply.write_to(&mut out).unwrap();

        let decoded = CommandReplyMessage::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(decoded, reply);
    }
}
