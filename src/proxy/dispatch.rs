//! Per-frame interception decisions.
//!
//! Every decoded frame passes through a [`Dispatcher`] before anything is forwarded. On
//! the client-to-server direction a query is either answered locally (negotiation or a
//! translated find) or let through; everything else is only observed. Opcodes outside
//! the known set are refused in both directions.
use std::sync::Arc;

use bson::doc;
use log::{debug, info, warn};
use thiserror::Error;

use super::{Direction, negotiate};
use crate::{
    config::FailurePolicy,
    storage::BackingStore,
    translate::{self, Translator},
    wire::{Header, Message, QueryMessage, ReplyFlags, ReplyMessage, WireError, encode_frame},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(i32),

    #[error("unrecognized negotiation query {0}")]
    UnrecognizedNegotiation(String),
}

/// A reply synthesized by the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: i32,
    pub response_to: i32,
    pub reply: ReplyMessage,
}

impl Response {
    /// Header and payload, ready for the socket.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode_frame(&self.reply, self.request_id, self.response_to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Send the original bytes on unchanged.
    Forward,
    /// Answer the sender directly; the original bytes go nowhere.
    Respond(Response),
}

pub struct Dispatcher {
    direction: Direction,
    store: Arc<dyn BackingStore>,
    policy: FailurePolicy,
    next_response_id: i32,
}

impl Dispatcher {
    pub fn new(direction: Direction, store: Arc<dyn BackingStore>, policy: FailurePolicy) -> Self {
        Self {
            direction,
            store,
            policy,
            next_response_id: 1,
        }
    }

    fn response_id(&mut self) -> i32 {
        let id = self.next_response_id;
        self.next_response_id = match self.next_response_id.wrapping_add(1) {
            n if n <= 0 => 1,
            n => n,
        };
        id
    }

    pub fn dispatch(&mut self, header: &Header, message: &Message) -> Result<Verdict, DispatchError> {
        match message {
            Message::Unsupported(opcode) => Err(DispatchError::UnsupportedOpcode(*opcode)),
            Message::Query(query) if self.direction == Direction::Upstream => {
                Ok(self.intercept(header, query))
            }
            _ => Ok(Verdict::Forward),
        }
    }

    fn intercept(&mut self, header: &Header, query: &QueryMessage) -> Verdict {
        if negotiate::is_negotiation(query) {
            return match negotiate::reply(query) {
                Ok(reply) => {
                    info!("answering negotiation request {}", header.request_id);
                    Verdict::Respond(Response {
                        request_id: self.response_id(),
                        // Negotiation replies are not correlated with their request.
                        response_to: 0,
                        reply,
                    })
                }
                Err(e) => {
                    debug!("{e}, forwarding");
                    Verdict::Forward
                }
            };
        }

        if !translate::is_findable(query) {
            return Verdict::Forward;
        }

        let reply = match Translator::new(self.store.as_ref()).translate(query) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("find on {} failed: {e}", query.namespace);
                match self.policy {
                    FailurePolicy::Forward => return Verdict::Forward,
                    FailurePolicy::Reply => failure_reply(&e.to_string()),
                }
            }
        };

        Verdict::Respond(Response {
            request_id: self.response_id(),
            response_to: header.request_id,
            reply,
        })
    }
}

fn failure_reply(reason: &str) -> ReplyMessage {
    ReplyMessage::single(
        ReplyFlags::QUERY_FAILURE,
        doc! { "$err": reason, "errmsg": reason, "ok": 0 },
    )
}
