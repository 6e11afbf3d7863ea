use std::{
    io::{self, BufReader},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, info, log_enabled, trace, warn};
use thiserror::Error;

use super::{
    Direction,
    dispatch::{DispatchError, Dispatcher, Verdict},
    signal::ErrorSignal,
    transport::{Conduit, Endpoint},
};
use crate::wire::{Frame, Opcode, WireError, read_frame};

/// Size of the buffer socket reads land in.
pub const READ_BUFFER_SIZE: usize = 0xffff;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("write failed: {0}")]
    Write(io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// One direction of a proxied connection.
///
/// Reads whole frames from its source, lets the dispatcher look at each one and then
/// either forwards the original bytes or answers the source directly.
pub struct Pipe {
    label: String,
    direction: Direction,
    source: BufReader<Box<dyn Conduit>>,
    origin: Endpoint,
    destination: Endpoint,
    dispatcher: Dispatcher,
    signal: ErrorSignal,
    forwarded: Arc<AtomicU64>,
    output_hex: bool,
}

impl Pipe {
    /// `source` is read from; `origin` is the write side of that same leg and
    /// `destination` the write side of the other one.
    pub fn new(
        direction: Direction,
        source: Box<dyn Conduit>,
        origin: Endpoint,
        destination: Endpoint,
        dispatcher: Dispatcher,
        signal: ErrorSignal,
    ) -> Self {
        Self {
            label: direction.to_string(),
            direction,
            source: BufReader::with_capacity(READ_BUFFER_SIZE, source),
            origin,
            destination,
            dispatcher,
            signal,
            forwarded: Arc::new(AtomicU64::new(0)),
            output_hex: false,
        }
    }

    pub fn with_connection_id(mut self, id: u64) -> Self {
        self.label = format!("[#{id:03}] {}", self.direction);
        self
    }

    pub fn with_output_hex(mut self, output_hex: bool) -> Self {
        self.output_hex = output_hex;
        self
    }

    /// Running total of bytes forwarded by this pipe.
    pub fn forwarded(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.forwarded)
    }

    /// Pumps frames until the source closes or something fails, then trips the
    /// connection's error signal.
    pub fn run(mut self) {
        let outcome = self.pump();
        let first = self.signal.trip(self.direction);

        match outcome {
            Ok(()) if first => info!("{} stream closed", self.label),
            Err(e) if first => warn!("{} {e}", self.label),
            // The other side already started the teardown; these are its echoes.
            Ok(()) => {}
            Err(e) => debug!("{} {e} (after teardown)", self.label),
        }
    }

    fn pump(&mut self) -> Result<(), PipeError> {
        while let Some(frame) = read_frame(&mut self.source)? {
            self.process(frame)?;
        }
        Ok(())
    }

    /// Only upstream queries can be answered locally; every other frame is forwarded
    /// whether or not its body decodes.
    fn may_intercept(&self, frame: &Frame) -> bool {
        self.direction == Direction::Upstream && frame.header.opcode == i32::from(Opcode::Query)
    }

    fn process(&mut self, frame: Frame) -> Result<(), PipeError> {
        debug!("{} =====NEW MESSAGE===== {}", self.label, frame.header);
        let message = match frame.message() {
            Ok(message) => message,
            Err(e) if !self.may_intercept(&frame) => {
                debug!("{} body not decoded ({e}), forwarding as is", self.label);
                return self.forward(&frame);
            }
            Err(e) => return Err(e.into()),
        };
        debug!("{} {message}", self.label);

        match self.dispatcher.dispatch(&frame.header, &message)? {
            Verdict::Forward => self.forward(&frame)?,
            Verdict::Respond(response) => {
                let bytes = response.encode()?;
                self.dump(&bytes);
                self.origin.send(&bytes).map_err(PipeError::Write)?;
                debug!(
                    "{} answered request {} locally with {} bytes",
                    self.label,
                    frame.header.request_id,
                    bytes.len()
                );
            }
        }
        Ok(())
    }

    fn forward(&self, frame: &Frame) -> Result<(), PipeError> {
        self.dump(&frame.bytes);
        self.destination
            .send(&frame.bytes)
            .map_err(PipeError::Write)?;
        self.forwarded
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        debug!("{} {} bytes {}", self.label, frame.len(), self.direction.verb());
        Ok(())
    }

    fn dump(&self, bytes: &[u8]) {
        if !log_enabled!(log::Level::Trace) {
            return;
        }
        if self.output_hex {
            trace!("{} {}", self.label, hex::encode(bytes));
        } else {
            trace!("{} {}", self.label, String::from_utf8_lossy(bytes));
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        // Covers a pipe that unwinds before reaching the end of `run`.
        self.signal.trip(self.direction);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        thread,
    };

    use bson::doc;

    use super::*;
    use crate::{
        config::FailurePolicy,
        storage::MemoryStore,
        wire::{HEADER_SIZE, Header, QueryFlags, QueryMessage, ReplyMessage, WireMessage, encode_frame},
    };

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Wires a single upstream pipe between two socket pairs and returns the far ends:
    /// (client, backend, pipe).
    fn harness() -> (TcpStream, TcpStream, Pipe, std::sync::mpsc::Receiver<Direction>) {
        let (client, local) = socket_pair();
        let (remote, backend) = socket_pair();

        let (local_reader, local_end) = Endpoint::split(Box::new(local)).unwrap();
        let (_remote_reader, remote_end) = Endpoint::split(Box::new(remote)).unwrap();
        let (signal, teardown) = ErrorSignal::new();
        let dispatcher = Dispatcher::new(
            Direction::Upstream,
            Arc::new(MemoryStore::new()),
            FailurePolicy::Reply,
        );

        let pipe = Pipe::new(
            Direction::Upstream,
            local_reader,
            local_end,
            remote_end,
            dispatcher,
            signal,
        )
        .with_connection_id(1);
        (client, backend, pipe, teardown)
    }

    fn query(namespace: &str, query: bson::Document) -> QueryMessage {
        QueryMessage {
            flags: QueryFlags::empty(),
            namespace: namespace.into(),
            number_to_skip: 0,
            number_to_return: -1,
            query,
            selector: None,
        }
    }

    fn read_reply(stream: &mut TcpStream) -> (Header, ReplyMessage) {
        let frame = read_frame(stream).unwrap().unwrap();
        let reply = ReplyMessage::read_from(&mut io::Cursor::new(frame.payload())).unwrap();
        (frame.header, reply)
    }

    #[test]
    fn pipe_forwards_unintercepted_frames_verbatim() {
        let (mut client, mut backend, pipe, teardown) = harness();
        let forwarded = pipe.forwarded();
        let handle = thread::spawn(move || pipe.run());

        let bytes = encode_frame(&query("mydb.widgets", doc! { "name": "bolt" }), 11, 0).unwrap();
        client.write_all(&bytes).unwrap();

        let mut received = vec![0u8; bytes.len()];
        backend.read_exact(&mut received).unwrap();
        assert_eq!(received, bytes);

        drop(client);
        assert_eq!(teardown.recv().unwrap(), Direction::Upstream);
        handle.join().unwrap();
        assert_eq!(forwarded.load(Ordering::Relaxed), bytes.len() as u64);
    }

    #[test]
    fn pipe_answers_negotiation_without_backend() {
        let (mut client, mut backend, pipe, _teardown) = harness();
        let forwarded = pipe.forwarded();
        let handle = thread::spawn(move || pipe.run());

        let bytes = encode_frame(&query("admin.$cmd", doc! { "ismaster": 1 }), 5, 0).unwrap();
        client.write_all(&bytes).unwrap();

        let (header, reply) = read_reply(&mut client);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.total_length as usize, HEADER_SIZE + reply.encoded_size().unwrap());
        assert!(reply.documents.get_bool("ismaster").unwrap());

        drop(client);
        handle.join().unwrap();

        let mut rest = Vec::new();
        backend.read_to_end(&mut rest).unwrap_or_default();
        assert!(rest.is_empty());
        assert_eq!(forwarded.load(Ordering::Relaxed), 0);
    }

    /// A reply for an empty result: header plus the fixed fields, no document.
    fn empty_reply_frame(request_id: i32, response_to: i32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for value in [36i32, request_id, response_to, 1, 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes
    }

    #[test]
    fn pipe_forwards_frames_it_cannot_decode_but_never_intercepts() {
        let (mut client, mut backend, pipe, teardown) = harness();
        let forwarded = pipe.forwarded();
        let handle = thread::spawn(move || pipe.run());

        let bytes = empty_reply_frame(4, 0);
        assert_eq!(bytes.len(), 36);
        client.write_all(&bytes).unwrap();

        let mut received = vec![0u8; bytes.len()];
        backend.read_exact(&mut received).unwrap();
        assert_eq!(received, bytes);

        drop(client);
        assert_eq!(teardown.recv().unwrap(), Direction::Upstream);
        handle.join().unwrap();
        assert_eq!(forwarded.load(Ordering::Relaxed), 36);
    }

    #[test]
    fn pipe_stops_on_undecodable_query() {
        let (mut client, _backend, pipe, teardown) = harness();
        let forwarded = pipe.forwarded();
        let handle = thread::spawn(move || pipe.run());

        // Flags, a namespace and one stray byte; the frame itself is complete.
        let mut bytes = Vec::new();
        for value in [31i32, 2, 0, 2004, 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(b"mydb.$cmd\0\0");
        assert_eq!(bytes.len(), 31);
        client.write_all(&bytes).unwrap();

        assert_eq!(teardown.recv().unwrap(), Direction::Upstream);
        handle.join().unwrap();
        assert_eq!(forwarded.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pipe_stops_on_unknown_opcode() {
        let (mut client, _backend, pipe, teardown) = harness();
        let forwarded = pipe.forwarded();
        let handle = thread::spawn(move || pipe.run());

        let mut bytes = Vec::new();
        for value in [20i32, 1, 0, 9999, 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        client.write_all(&bytes).unwrap();

        assert_eq!(teardown.recv().unwrap(), Direction::Upstream);
        handle.join().unwrap();
        assert_eq!(forwarded.load(Ordering::Relaxed), 0);
    }
}
