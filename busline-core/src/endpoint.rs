//! Endpoint (spec §3, §4.4, §4.5, §4.10): the top-level handle a user
//! program holds. Owns the object table, the subscription registry, the
//! event cache, and the set of live sessions, and is the unit on which
//! the context worker's dispatch rules (spec §5: "modified only on its
//! context worker") are enforced by convention — callers are expected to
//! drive mutation through `WorkerHandle::post_sync`/`post_async` onto the
//! context worker, mirroring how the teacher schedules all socket state
//! changes as jobs rather than locking across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{codes, BusError};
use crate::event_cache::{CacheOutcome, EventCache};
use crate::ids::{ObjectId, SessionId};
use crate::message::{Message, MessageFlags, MessageKind};
use crate::object::{HandlerOutcome, Object};
use crate::session::{Session, SessionState};
use crate::status::Status;
use crate::subscription::{SubscriptionKind, SubscriptionRegistry};
use crate::worker::WorkerHandle;

/// Sub-kind of a `SubscribeRequest` (spec §4.5), not itself a wire
/// `MessageKind` but a discriminant carried in the payload/code — here,
/// the message's `code` field, since `SubscribeRequest` has no other use
/// for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeSubKind {
    Subscribe,
    Unsubscribe,
    Update,
}

impl SubscribeSubKind {
    pub fn as_code(self) -> i32 {
        match self {
            SubscribeSubKind::Subscribe => 0,
            SubscribeSubKind::Unsubscribe => 1,
            SubscribeSubKind::Update => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SubscribeSubKind::Subscribe),
            1 => Some(SubscribeSubKind::Unsubscribe),
            2 => Some(SubscribeSubKind::Update),
            _ => None,
        }
    }
}

/// One `(code, topic, type)` element of a subscribe/unsubscribe payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeElement {
    pub code: i32,
    pub topic: String,
    pub manual_update: bool,
}

/// Wire encoding of a `SubscribeRequest` payload: a flat list of elements,
/// `count:u16` followed by `code:i32, manual_update:u8, topic_len:u16,
/// topic_bytes` per entry. Distinct from the `Message` frame encoding in
/// [`crate::framing`], which treats this payload as opaque bytes.
pub fn encode_subscribe_elements(elements: &[SubscribeElement]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + elements.len() * 8);
    buf.extend_from_slice(&(elements.len() as u16).to_le_bytes());
    for e in elements {
        buf.extend_from_slice(&e.code.to_le_bytes());
        buf.push(e.manual_update as u8);
        buf.extend_from_slice(&(e.topic.len() as u16).to_le_bytes());
        buf.extend_from_slice(e.topic.as_bytes());
    }
    buf
}

pub fn decode_subscribe_elements(payload: &[u8]) -> Result<Vec<SubscribeElement>, BusError> {
    let truncated = || BusError::framing(codes::FRAMING_DECODE, "truncated subscribe payload");
    if payload.len() < 2 {
        return Err(truncated());
    }
    let count = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let mut cursor = 2usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.len() < cursor + 4 + 1 + 2 {
            return Err(truncated());
        }
        let code = i32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        let manual_update = payload[cursor] != 0;
        cursor += 1;
        let topic_len = u16::from_le_bytes([payload[cursor], payload[cursor + 1]]) as usize;
        cursor += 2;
        if payload.len() < cursor + topic_len {
            return Err(truncated());
        }
        let topic = String::from_utf8(payload[cursor..cursor + topic_len].to_vec())
            .map_err(|e| BusError::framing(codes::FRAMING_DECODE, e.to_string()))?;
        cursor += topic_len;
        out.push(SubscribeElement {
            code,
            topic,
            manual_update,
        });
    }
    Ok(out)
}

pub struct Endpoint {
    name: String,
    context_worker: WorkerHandle,
    objects: RwLock<HashMap<ObjectId, Arc<Object>>>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    subscriptions: SubscriptionRegistry,
    cache: EventCache,
    cache_enabled: bool,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, context_worker: WorkerHandle, cache_enabled: bool) -> Arc<Self> {
        Self::with_cache_capacity(name, context_worker, cache_enabled, 4_096)
    }

    /// As [`Endpoint::new`], but with an explicit event-cache capacity
    /// (spec §12's config key) instead of the default.
    pub fn with_cache_capacity(
        name: impl Into<String>,
        context_worker: WorkerHandle,
        cache_enabled: bool,
        cache_capacity: usize,
    ) -> Arc<Self> {
        let endpoint = Arc::new(Endpoint {
            name: name.into(),
            context_worker,
            objects: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            cache: EventCache::new(cache_capacity),
            cache_enabled,
        });
        endpoint
            .objects
            .write()
            .insert(ObjectId::PRIMARY, Arc::new(Object::new(ObjectId::PRIMARY)));
        endpoint
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_worker(&self) -> WorkerHandle {
        self.context_worker.clone()
    }

    pub fn create_object(&self, id: ObjectId) -> Arc<Object> {
        let object = Arc::new(Object::new(id));
        self.objects.write().insert(id, object.clone());
        object
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<Object>> {
        self.objects.read().get(&id).cloned()
    }

    pub fn adopt_session(&self, session: Arc<Session>) {
        session.mark_connected();
        self.sessions.write().insert(session.id(), session);
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// `Live -> Draining -> Dead` for one session (spec §4.4, §4.10):
    /// flush pending replies and erase its subscriptions.
    pub fn retire_session(&self, id: SessionId) {
        if let Some(session) = self.sessions.write().remove(&id) {
            session.begin_drain();
            session.finish_drain();
        }
        self.subscriptions.drop_session(id);
    }

    /// Dispatches one inbound message per spec §4.5. `sender_session` is
    /// the session the frame arrived on. Takes `&Arc<Self>` because a
    /// request handler's delivery is migrated onto its own worker via an
    /// async job that needs to hold its own endpoint reference.
    pub fn dispatch_inbound(self: &Arc<Self>, message: Message, sender_session: SessionId) -> Result<(), BusError> {
        match message.kind {
            // `GetEvent` is dispatched exactly like a synchronous request
            // (the handler registered for its code decides how to answer,
            // typically by consulting the event cache); only its reply
            // kind differs (`Message::reply_to` answers it with
            // `ReturnEvent` instead of `Reply`).
            MessageKind::Request | MessageKind::SidebandRequest | MessageKind::GetEvent => {
                self.dispatch_request_like(message, sender_session)
            }
            MessageKind::SubscribeRequest => {
                Err(BusError::dispatch(
                    codes::DISPATCH_INVALID_ID,
                    "SubscribeRequest must be routed via handle_subscribe_request",
                ))
            }
            MessageKind::Broadcast | MessageKind::Publish => {
                self.handle_broadcast(message);
                Ok(())
            }
            MessageKind::Reply | MessageKind::Status | MessageKind::SidebandReply | MessageKind::ReturnEvent => {
                self.route_reply(message, sender_session);
                Ok(())
            }
            MessageKind::Unknown => Err(BusError::dispatch(
                codes::DISPATCH_UNKNOWN_CODE,
                "message kind not handled by dispatch_inbound",
            )),
        }
    }

    fn dispatch_request_like(self: &Arc<Self>, message: Message, session: SessionId) -> Result<(), BusError> {
        // Unknown object id is a dispatch error (spec §4.10): synthesize a
        // `Status` reply on the same channel rather than tearing down the
        // session or propagating an `Err` out of `dispatch_inbound`.
        let Some(object) = self.object(message.object_id) else {
            self.reply_status(session, &message, Status::ObjectNotFound);
            return Ok(());
        };

        if !object.authenticate(&message, session) {
            self.reply_status(session, &message, Status::AuthenticationFail);
            return Ok(());
        }

        // The handler itself runs on its registered worker, not on whatever
        // thread is driving this session's reads (spec §4.5: "delivery is
        // migrated to that worker via an async job"). An object with no
        // handler for this code still needs the `Status` reply sent from
        // somewhere; the context worker is as good a place as any since
        // there is no handler worker to prefer.
        match object.handler_worker(message.code) {
            Some(worker) => {
                let endpoint = Arc::clone(self);
                worker.post_async_normal(move || {
                    endpoint.run_request_handler(object, message, session);
                });
            }
            None => self.reply_status(session, &message, Status::ObjectNotFound),
        }
        Ok(())
    }

    /// Runs the registered handler for `message.code` on whatever worker
    /// called this (expected to be the handler's registered worker, per
    /// [`dispatch_request_like`]'s job post), then migrates the auto-reply
    /// send back onto the same worker.
    fn run_request_handler(&self, object: Arc<Object>, message: Message, session: SessionId) {
        match object.dispatch_request(&message, session) {
            Ok(HandlerOutcome::Consumed) => {}
            Ok(HandlerOutcome::AutoReply(payload)) => {
                if let Some(target) = self.session(session) {
                    let reply = message.reply_to(target.id(), payload);
                    self.send_to_session(&target, reply);
                }
            }
            Err(err) => {
                self.reply_status(session, &message, Status::from_category(err.category()));
            }
        }
    }

    fn reply_status(&self, session: SessionId, message: &Message, status: Status) {
        if let Some(target) = self.session(session) {
            let reply = message.status_to(target.id(), status);
            self.send_to_session(&target, reply);
        }
    }

    /// Routes a `Reply`/`Status`/`SidebandReply`/`ReturnEvent` to the
    /// pending-reply table (spec §4.4/§4.5). Unknown or dead sessions are
    /// logged and dropped (spec §4.10: "no error back to the publisher").
    fn route_reply(&self, message: Message, session: SessionId) {
        match self.session(session) {
            Some(target) => target.complete_reply(message),
            None => warn!(session_id = session.as_u64(), "reply for unknown session dropped"),
        }
    }

    /// `SubscribeRequest` handling for all three sub-kinds (spec §4.5).
    pub fn handle_subscribe_request(
        &self,
        sub_kind: SubscribeSubKind,
        object_id: ObjectId,
        session: SessionId,
        elements: &[SubscribeElement],
    ) {
        let Some(object) = self.object(object_id) else {
            self.reply_status(
                session,
                &Message::request(object_id, 0, Vec::<u8>::new()),
                Status::ObjectNotFound,
            );
            return;
        };

        match sub_kind {
            SubscribeSubKind::Subscribe => {
                let mut any_auth_failed = false;
                for element in elements {
                    if !object.authenticate_event(element.code, &element.topic, session) {
                        any_auth_failed = true;
                        continue;
                    }
                    let kind = if element.manual_update {
                        SubscriptionKind::ManualUpdate
                    } else {
                        SubscriptionKind::Normal
                    };
                    self.subscriptions
                        .subscribe(session, object_id, element.code, element.topic.clone(), kind);
                }
                if any_auth_failed {
                    self.reply_status(
                        session,
                        &Message::request(object_id, 0, Vec::<u8>::new()),
                        Status::AuthenticationFail,
                    );
                }
                object.notify_subscribe(session, false);
                self.replay_cache_snapshot(object_id, session, elements);
            }
            SubscribeSubKind::Unsubscribe => {
                for element in elements {
                    self.subscriptions
                        .unsubscribe(session, object_id, element.code, &element.topic);
                }
            }
            SubscribeSubKind::Update => {
                object.notify_subscribe(session, true);
            }
        }
    }

    fn replay_cache_snapshot(&self, _object_id: ObjectId, session: SessionId, elements: &[SubscribeElement]) {
        if !self.cache_enabled {
            return;
        }
        let Some(target) = self.session(session) else {
            return;
        };
        for element in elements {
            if element.manual_update {
                continue; // Open Question 1: no replay for ManualUpdate entries.
            }
            for (topic, payload) in self.cache.matching(element.code, &element.topic) {
                let mut snapshot = Message::broadcast(ObjectId::PRIMARY, element.code, topic, payload);
                snapshot.flags.insert(MessageFlags::INITIAL_RESPONSE);
                self.send_to_session(&target, snapshot);
            }
        }
    }

    /// `Broadcast`/`Publish` fan-out (spec §4.6, §4.7).
    fn handle_broadcast(&self, message: Message) {
        if self.cache_enabled {
            let outcome = self.cache.offer(
                message.code,
                &message.topic,
                message.payload.clone(),
                message.flags.contains(MessageFlags::FORCE_UPDATE),
            );
            if outcome == CacheOutcome::Unchanged {
                return;
            }
        }

        let targets = self.subscriptions.broadcast_targets(message.code, &message.topic);
        for target in targets {
            if let Some(session) = self.session(target.session) {
                self.send_to_session(&session, message.clone_for_dispatch());
            } else {
                warn!(
                    session_id = target.session.as_u64(),
                    "broadcast target session vanished, dropping"
                );
            }
        }
    }

    /// Hands `message` to the session's write path (spec §4.3). Queues onto
    /// the outbound channel [`crate::io::run_session`] drains; sessions with
    /// no attached transport (unit tests exercising dispatch logic only)
    /// just log, matching how the teacher's transport degrades to a no-op
    /// sink when a channel's write half was never wired up.
    fn send_to_session(&self, session: &Arc<Session>, message: Message) {
        if session.is_dead() {
            return;
        }
        if !session.send_frame(message) {
            info!(
                session_id = session.id().as_u64(),
                "no transport attached or writer gone; message dropped"
            );
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_states(&self) -> Vec<(SessionId, SessionState)> {
        self.sessions
            .read()
            .values()
            .map(|s| (s.id(), s.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;

    fn make_endpoint() -> (Arc<Endpoint>, Worker) {
        let worker = Worker::spawn("test-endpoint-worker");
        let handle = worker.handle();
        (Endpoint::new("test.endpoint", handle, true), worker)
    }

    #[test]
    fn subscribe_element_wire_encoding_round_trips() {
        let elements = vec![
            SubscribeElement {
                code: 256,
                topic: "t1".to_string(),
                manual_update: false,
            },
            SubscribeElement {
                code: 257,
                topic: String::new(),
                manual_update: true,
            },
        ];
        let encoded = encode_subscribe_elements(&elements);
        let decoded = decode_subscribe_elements(&encoded).unwrap();
        assert_eq!(decoded, elements);
    }

    #[test]
    fn subscribe_sub_kind_code_round_trips() {
        for kind in [
            SubscribeSubKind::Subscribe,
            SubscribeSubKind::Unsubscribe,
            SubscribeSubKind::Update,
        ] {
            assert_eq!(SubscribeSubKind::from_code(kind.as_code()), Some(kind));
        }
    }

    #[test]
    fn subscribe_then_broadcast_delivers_to_matching_session() {
        let (endpoint, _worker) = make_endpoint();
        let session = Session::new(true);
        endpoint.adopt_session(session.clone());
        endpoint.handle_subscribe_request(
            SubscribeSubKind::Subscribe,
            ObjectId::PRIMARY,
            session.id(),
            &[SubscribeElement {
                code: 5,
                topic: "t".to_string(),
                manual_update: false,
            }],
        );
        let broadcast = Message::broadcast(ObjectId::PRIMARY, 5, "t", vec![1, 2, 3]);
        endpoint.dispatch_inbound(broadcast, session.id()).unwrap();
    }

    #[test]
    fn subscribe_to_unknown_object_replies_object_not_found() {
        let (endpoint, _worker) = make_endpoint();
        let session = Session::new(true);
        endpoint.adopt_session(session.clone());
        endpoint.handle_subscribe_request(
            SubscribeSubKind::Subscribe,
            ObjectId::new(99),
            session.id(),
            &[SubscribeElement {
                code: 1,
                topic: String::new(),
                manual_update: false,
            }],
        );
        // No panic, no entry registered on a nonexistent object.
    }

    #[test]
    fn retiring_a_session_erases_its_subscriptions() {
        let (endpoint, _worker) = make_endpoint();
        let session = Session::new(true);
        endpoint.adopt_session(session.clone());
        endpoint.handle_subscribe_request(
            SubscribeSubKind::Subscribe,
            ObjectId::PRIMARY,
            session.id(),
            &[SubscribeElement {
                code: 5,
                topic: "t".to_string(),
                manual_update: false,
            }],
        );
        endpoint.retire_session(session.id());
        assert_eq!(endpoint.session_count(), 0);
    }

    #[test]
    fn broadcast_delivers_an_independent_payload_buffer_to_each_subscribed_session() {
        let (endpoint, _worker) = make_endpoint();
        let worker_a = Worker::spawn("test-multi-dispatch-worker-a");
        let worker_b = Worker::spawn("test-multi-dispatch-worker-b");

        let session_a = Session::new(true);
        let session_b = Session::new(true);
        endpoint.adopt_session(session_a.clone());
        endpoint.adopt_session(session_b.clone());

        let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel::<Message>();
        session_a.attach_outbound(tx_a);
        session_b.attach_outbound(tx_b);

        for (session, worker) in [(&session_a, &worker_a), (&session_b, &worker_b)] {
            endpoint.handle_subscribe_request(
                SubscribeSubKind::Subscribe,
                ObjectId::PRIMARY,
                session.id(),
                &[SubscribeElement {
                    code: 256,
                    topic: "t1".to_string(),
                    manual_update: false,
                }],
            );
            // Registered on distinct workers (spec §8 scenario 6: "delivered
            // on its own worker"); the registry itself is worker-agnostic,
            // so this only documents that each session's handler may live
            // on a different worker without affecting fan-out.
            let _ = worker;
        }

        let broadcast = Message::broadcast(ObjectId::PRIMARY, 256, "t1", vec![0x42]);
        endpoint.dispatch_inbound(broadcast, SessionId::next()).unwrap();

        let got_a = rx_a.try_recv().unwrap();
        let got_b = rx_b.try_recv().unwrap();
        assert_eq!(&got_a.payload[..], &[0x42]);
        assert_eq!(&got_b.payload[..], &[0x42]);
        // Distinct `Message` values (each session's own clone), sharing the
        // same immutable `Arc<[u8]>` payload buffer rather than copying it —
        // safe because the payload is never mutated after a broadcast.
        assert!(Arc::ptr_eq(&got_a.payload, &got_b.payload));
    }

    #[tokio::test]
    async fn get_event_is_dispatched_like_a_request_and_replies_with_return_event() {
        let (endpoint, worker) = make_endpoint();
        let session = Session::new(true);
        endpoint.adopt_session(session.clone());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        session.attach_outbound(tx);
        endpoint.object(ObjectId::PRIMARY).unwrap().register_request_handler(
            256,
            Box::new(|_msg, _session| crate::object::HandlerOutcome::AutoReply(vec![0xAA].into())),
            None,
            &worker.handle(),
        );

        let mut get_event = Message::request(ObjectId::PRIMARY, 256, Vec::<u8>::new());
        get_event.kind = MessageKind::GetEvent;
        endpoint.dispatch_inbound(get_event, session.id()).unwrap();

        // The handler runs as an async job on its own worker thread, so the
        // reply arrives asynchronously; `recv` waits for it rather than
        // racing a `try_recv` against that job.
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.kind, MessageKind::ReturnEvent);
        assert_eq!(&reply.payload[..], &[0xAA]);
    }

    #[test]
    fn unknown_object_request_replies_object_not_found_without_error() {
        let (endpoint, _worker) = make_endpoint();
        let session = Session::new(true);
        endpoint.adopt_session(session.clone());
        let msg = Message::request(ObjectId::new(42), 1, Vec::<u8>::new());
        // Dispatch itself must not fail (spec §4.10: "do not tear down the
        // session"); the `ObjectNotFound` status goes out on the reply
        // channel instead.
        endpoint.dispatch_inbound(msg, session.id()).unwrap();
        assert_eq!(session.state(), crate::session::SessionState::Live);
    }
}
