//! Message-id to handler table, built once at startup. The dispatcher
//! owns emitting the 0x8001 acknowledgement for whatever a handler
//! decided (or suppressing it, for the few message ids that don't get a
//! generic ack) — handlers never write the ack themselves.

use std::collections::HashMap;

use bytes::Bytes;
use dc600_proto::location::Position;
use dc600_proto::media::MultimediaPrefix;
use dc600_proto::message_id::{inbound, AckResult};

use crate::config::Config;
use crate::handlers;
use crate::session::DeviceSession;
use crate::sinks::{DeviceDirectory, MediaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack(AckResult),
    Suppress,
}

pub struct OutboundFrame {
    pub message_id: u16,
    pub body: Bytes,
}

#[derive(Default)]
pub struct HandlerOutcome {
    pub positions: Vec<Position>,
    pub completed_media: Vec<(MultimediaPrefix, Vec<u8>)>,
    pub ack: Option<AckDecision>,
    pub commands: Vec<OutboundFrame>,
}

impl HandlerOutcome {
    pub fn ack(result: AckResult) -> Self {
        Self { ack: Some(AckDecision::Ack(result)), ..Default::default() }
    }
}

pub struct DispatchContext<'a> {
    pub config: &'a Config,
    pub directory: &'a dyn DeviceDirectory,
    pub media_store: &'a dyn MediaStore,
}

type HandlerFn =
    fn(&mut DeviceSession, &dc600_proto::header::MessageHeader, &[u8], &DispatchContext) -> HandlerOutcome;

/// A table rather than open recursion through a giant match in the
/// connection loop — adding a message id is adding one line here, not
/// threading a new branch through the read loop.
pub struct Dispatcher {
    handlers: HashMap<u16, HandlerFn>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<u16, HandlerFn> = HashMap::new();
        handlers.insert(inbound::GENERAL_RESPONSE, handlers::handle_general_response);
        handlers.insert(inbound::HEARTBEAT, handlers::handle_heartbeat);
        handlers.insert(inbound::REGISTER, handlers::handle_register);
        handlers.insert(inbound::AUTHENTICATE, handlers::handle_authenticate);
        handlers.insert(inbound::LOCATION_REPORT, handlers::handle_location);
        handlers.insert(inbound::BATCH_UPLOAD, handlers::handle_batch_upload);
        handlers.insert(inbound::MULTIMEDIA_EVENT, handlers::handle_multimedia_event);
        handlers.insert(inbound::MULTIMEDIA_UPLOAD, handlers::handle_multimedia_upload);
        handlers.insert(inbound::CAMERA_RESPONSE, handlers::handle_camera_response);
        handlers.insert(inbound::ATTACHMENT_FILE_LIST, handlers::handle_attachment_file_list);
        Self { handlers }
    }

    pub fn dispatch(
        &self,
        session: &mut DeviceSession,
        header: &dc600_proto::header::MessageHeader,
        body: &[u8],
        ctx: &DispatchContext,
    ) -> HandlerOutcome {
        match self.handlers.get(&header.message_id) {
            Some(handler) => handler(session, header, body, ctx),
            None => {
                tracing::warn!(message_id = format!("{:#06x}", header.message_id), "no handler registered for message id");
                HandlerOutcome::ack(AckResult::NotSupported)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
