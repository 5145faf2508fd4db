//! Session I/O driver: the piece that actually turns a [`crate::channel::Channel`]
//! plus an [`crate::endpoint::Endpoint`] into a live, reading/writing session
//! (spec §4.1/§4.3/§4.4). Everything upstream of this module (framing,
//! session bookkeeping, object dispatch) is transport-agnostic on purpose;
//! this is the seam where a concrete `Channel` is spent.
//!
//! One `tokio::spawn`ed task per direction per session: a reader loop that
//! decodes frames and hands them to `Endpoint::dispatch_inbound` (or the
//! `SubscribeRequest` path), and a writer loop that drains the session's
//! outbound queue. Tying both to the session's lifecycle means a read error
//! tears down the write side too, matching spec §4.4's "peer hup, read
//! error, write error ... -> Draining".

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::endpoint::{decode_subscribe_elements, Endpoint, SubscribeSubKind};
use crate::error::BusError;
use crate::framing::{self, DecodedFrame};
use crate::message::{Message, MessageKind};
use crate::session::Session;

/// Drives one accepted or connected session to completion: reads frames
/// until EOF or a framing/transport error, dispatching each into
/// `endpoint`, while a sibling task drains `session`'s outbound queue onto
/// the same channel's write half. Returns once both directions have ended
/// and the session has been retired from `endpoint`.
pub async fn run_session<C>(endpoint: Arc<Endpoint>, session: Arc<Session>, channel: C, sender_name: Option<String>)
where
    C: Channel,
{
    let (mut read_half, mut write_half) = tokio::io::split(channel);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    session.attach_outbound(outbound_tx);

    let writer_sender_name = sender_name.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = framing::write_frame(&mut write_half, &message, writer_sender_name.as_deref()).await {
                debug!(error = %err, "session write failed, stopping writer");
                break;
            }
        }
    });

    loop {
        match framing::read_frame(&mut read_half).await {
            Ok(Some(frame)) => dispatch_frame(&endpoint, &session, frame),
            Ok(None) => break,
            Err(err) => {
                warn!(session_id = session.id().as_u64(), error = %err, "session marked fatal on framing error");
                break;
            }
        }
    }

    endpoint.retire_session(session.id());
    writer.abort();
}

fn dispatch_frame(endpoint: &Arc<Endpoint>, session: &Arc<Session>, frame: DecodedFrame) {
    if let Some(name) = frame.sender_name {
        session.set_peer_name(name);
    }
    let message = frame.message;
    if message.kind == MessageKind::SubscribeRequest {
        dispatch_subscribe(endpoint, session, message);
        return;
    }
    if let Err(err) = endpoint.dispatch_inbound(message, session.id()) {
        warn!(session_id = session.id().as_u64(), error = %err, "inbound dispatch failed");
    }
}

fn dispatch_subscribe(endpoint: &Arc<Endpoint>, session: &Arc<Session>, message: Message) {
    let Some(sub_kind) = SubscribeSubKind::from_code(message.code) else {
        warn!(code = message.code, "unknown subscribe sub-kind, dropping");
        return;
    };
    let elements = match decode_subscribe_elements(&message.payload) {
        Ok(elements) => elements,
        Err(err) => {
            warn!(error = %err, "malformed subscribe payload, dropping");
            return;
        }
    };
    endpoint.handle_subscribe_request(sub_kind, message.object_id, session.id(), &elements);
}

/// Convenience for a client's single outbound request over a freshly
/// connected channel that is not (yet) driven by [`run_session`]: build the
/// frame, write it directly, and await the reply via the session's
/// pending-reply table. Exists for simple request/response tests and tools
/// that don't need the full duplex session driver.
pub async fn write_request<W>(writer: &mut W, message: &Message, sender_name: Option<&str>) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
{
    framing::write_frame(writer, message, sender_name).await
}

/// Reads exactly one frame, for the same narrow use case as
/// [`write_request`].
pub async fn read_one<R>(reader: &mut R) -> Result<Option<DecodedFrame>, BusError>
where
    R: AsyncRead + Unpin,
{
    framing::read_frame(reader).await
}
