//! Session lifecycle and request/reply correlation (spec §4.4).
//!
//! A `Session` wraps one connected [`crate::channel::Channel`] plus the
//! pending-reply table keyed by serial. The state machine is
//! `Connecting -> Connected -> (Live | Draining) -> Dead`; `Draining ->
//! Dead` flushes every outstanding request with `PeerVanish`, mirroring
//! the teacher's own "drain then flush" shutdown sequence in its
//! transport channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::{codes, BusError};
use crate::ids::{SerialAllocator, SessionId};
use crate::message::Message;
use crate::status::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Live = 2,
    Draining = 3,
    Dead = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Live,
            3 => SessionState::Draining,
            _ => SessionState::Dead,
        }
    }
}

/// Completion channel for one in-flight request. Sync callers await the
/// oneshot directly; async callers are completed via a worker job that
/// calls into the same channel from the delivering task (spec §4.4: "sync
/// semaphore or async callback migrated to a worker").
struct PendingReply {
    reply_tx: oneshot::Sender<Result<Message, BusError>>,
}

/// One connected endpoint-to-endpoint link. Transport-agnostic: owns no
/// socket directly, only the bookkeeping the spec assigns to "the
/// session" as distinct from "the channel".
pub struct Session {
    id: SessionId,
    state: AtomicU8,
    peer_name: Mutex<Option<String>>,
    serials: SerialAllocator,
    pending: Mutex<HashMap<i32, PendingReply>>,
    is_local: bool,
    /// Set by [`crate::io::run_session`] once a real transport drives this
    /// session; `Endpoint::send_to_session` pushes onto it instead of only
    /// logging. `None` for sessions under test that never attach a
    /// transport (spec §4.3's write path, kept transport-agnostic here).
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Session {
    pub fn new(is_local: bool) -> Arc<Self> {
        Arc::new(Session {
            id: SessionId::next(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            peer_name: Mutex::new(None),
            serials: SerialAllocator::new(),
            pending: Mutex::new(HashMap::new()),
            is_local,
            outbound: Mutex::new(None),
        })
    }

    /// Attaches the outbound queue a real I/O driver drains (spec §4.3's
    /// write path: short writes are queued, not re-attempted inline).
    pub fn attach_outbound(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock() = Some(tx);
    }

    /// Queues `message` for the write half of this session's channel.
    /// Returns `false` if no transport is attached or the writer task has
    /// already gone away (session effectively dead on the write side).
    pub fn send_frame(&self, message: Message) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: SessionState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn set_peer_name(&self, name: impl Into<String>) {
        *self.peer_name.lock() = Some(name.into());
    }

    pub fn peer_name(&self) -> Option<String> {
        self.peer_name.lock().clone()
    }

    /// `Connecting -> Connected`, fired once the stream connect or accept
    /// succeeds (spec §4.4). Callers invoke the endpoint's online callback
    /// on the endpoint's chosen worker after this returns.
    pub fn mark_connected(&self) {
        self.set_state(SessionState::Connected);
        self.set_state(SessionState::Live);
    }

    /// Allocates a serial and registers a pending-reply entry for a
    /// request being sent, returning the oneshot the caller awaits.
    /// Rejects with `InvalidId` once the session has begun draining
    /// (spec §4.4: "new outbound requests fail with `InvalidId`").
    pub fn begin_request(&self) -> Result<(i32, oneshot::Receiver<Result<Message, BusError>>), BusError> {
        if self.state() != SessionState::Live {
            return Err(BusError::dispatch(
                codes::DISPATCH_INVALID_ID,
                "session is not live",
            ));
        }
        let sn = self.serials.allocate();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(sn, PendingReply { reply_tx: tx });
        Ok((sn, rx))
    }

    /// Cancels a pending request whose timeout fired (spec §4.4). Returns
    /// `true` if it was still present (a reply hadn't already arrived).
    pub fn cancel_on_timeout(&self, sn: i32) -> bool {
        self.pending.lock().remove(&sn).is_some()
    }

    /// Sends a request over this session's attached transport and awaits
    /// the reply, arming a one-shot timer keyed by the allocated serial
    /// when `timeout_ms` is positive (spec §4.4: "on expiry the pending
    /// entry is removed and the caller is completed with Timeout"). A
    /// `timeout_ms` of `0` waits forever, matching `WorkerHandle::post_sync`.
    pub async fn call(self: &Arc<Self>, mut message: Message, timeout_ms: u64) -> Result<Message, BusError> {
        let (sn, rx) = self.begin_request()?;
        message.serial = sn;
        if !self.send_frame(message) {
            self.cancel_on_timeout(sn);
            return Err(BusError::dispatch(
                codes::TRANSPORT_PEER_VANISH,
                "no transport attached to session",
            ));
        }
        let outcome = if timeout_ms == 0 {
            rx.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.cancel_on_timeout(sn);
                    return Err(BusError::timeout("request timed out waiting for reply"));
                }
            }
        };
        outcome.unwrap_or_else(|_| {
            Err(BusError::dispatch(
                codes::TRANSPORT_PEER_VANISH,
                "session dropped before reply arrived",
            ))
        })
    }

    /// Routes an inbound reply-kind message to its pending entry (spec
    /// §4.4/§4.5). A reply for an unknown or already-completed serial
    /// (arrived after its timeout) is dropped silently.
    pub fn complete_reply(&self, message: Message) {
        let entry = self.pending.lock().remove(&message.serial);
        if let Some(entry) = entry {
            let _ = entry.reply_tx.send(Ok(message));
        } else {
            trace!(serial = message.serial, "reply for unknown or expired serial dropped");
        }
    }

    /// `Live -> Draining`: peer hup, read/write error, or explicit
    /// disconnect (spec §4.4).
    pub fn begin_drain(&self) {
        self.set_state(SessionState::Draining);
    }

    /// `Draining -> Dead`: flush every pending reply with `PeerVanish`
    /// (spec §4.4, §4.10).
    pub fn finish_drain(&self) {
        self.set_state(SessionState::Dead);
        let pendings: Vec<PendingReply> = self.pending.lock().drain().map(|(_, v)| v).collect();
        for pending in pendings {
            let _ = pending.reply_tx.send(Err(BusError::dispatch(
                codes::TRANSPORT_PEER_VANISH,
                "session died before reply arrived",
            )));
        }
    }

    pub fn peer_vanish_status() -> Status {
        Status::PeerVanish
    }

    pub fn is_dead(&self) -> bool {
        self.state() == SessionState::Dead
    }
}

pub fn log_session_fatal(session: &Session, reason: &str) {
    warn!(session_id = session.id().as_u64(), reason, "session marked fatal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectId;

    #[tokio::test]
    async fn request_reply_round_trip_completes_the_waiter() {
        let session = Session::new(true);
        session.mark_connected();
        let (sn, rx) = session.begin_request().unwrap();
        let reply = Message::request(ObjectId::new(0), 1, Vec::<u8>::new()).reply_to(session.id(), Vec::<u8>::new());
        let mut reply = reply;
        reply.serial = sn;
        session.complete_reply(reply);
        let got = rx.await.unwrap().unwrap();
        assert_eq!(got.serial, sn);
    }

    #[tokio::test]
    async fn draining_flushes_pending_with_peer_vanish() {
        let session = Session::new(true);
        session.mark_connected();
        let (_sn, rx) = session.begin_request().unwrap();
        session.begin_drain();
        session.finish_drain();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code(), codes::TRANSPORT_PEER_VANISH);
        assert!(session.is_dead());
    }

    #[tokio::test]
    async fn requests_after_drain_fail_fast_with_invalid_id() {
        let session = Session::new(true);
        session.mark_connected();
        session.begin_drain();
        let err = session.begin_request().unwrap_err();
        assert_eq!(err.code(), codes::DISPATCH_INVALID_ID);
    }

    #[tokio::test]
    async fn timeout_cancellation_then_late_reply_is_dropped() {
        let session = Session::new(true);
        session.mark_connected();
        let (sn, rx) = session.begin_request().unwrap();
        assert!(session.cancel_on_timeout(sn));
        drop(rx);
        let mut late = Message::request(ObjectId::new(0), 1, Vec::<u8>::new());
        late.serial = sn;
        // Should not panic even though nothing is waiting any more.
        session.complete_reply(late);
    }
}
