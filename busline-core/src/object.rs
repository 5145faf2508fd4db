//! Object dispatch (spec §4.5): per-`obj_id` handler tables for requests,
//! subscribe/unsubscribe/update, broadcasts, and published events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{codes, BusError};
use crate::ids::{ObjectId, SessionId};
use crate::message::Message;
use crate::subscription::SubscriptionKind;
use crate::worker::WorkerHandle;

/// What a request handler does with an inbound `Request`/`SidebandRequest`.
/// Returning `Consumed` means the handler has already sent a reply or
/// status itself; `AutoReply(payload)` lets the dispatcher build one,
/// matching spec §4.5's "auto-reply is enabled when the handler does not
/// consume the reply capability".
#[derive(Debug)]
pub enum HandlerOutcome {
    Consumed,
    AutoReply(Arc<[u8]>),
}

pub type RequestHandler = Box<dyn Fn(&Message, SessionId) -> HandlerOutcome + Send + Sync>;
pub type SubscribeHandler = Box<dyn Fn(SubscribeNotice) + Send + Sync>;

/// Passed to an object's subscribe handler after the registry mutation for
/// `Subscribe`/`Unsubscribe`, or in place of a mutation for `Update` (spec
/// §4.5).
pub struct SubscribeNotice {
    pub session: SessionId,
    pub object_id: ObjectId,
    pub manual_update: bool,
}

struct HandlerRecord {
    handler: RequestHandler,
    worker: WorkerHandle,
}

/// One dispatch scope within an endpoint. Object id zero is the
/// endpoint's own primary object (spec §3, §4.5).
pub struct Object {
    id: ObjectId,
    request_handlers: RwLock<HashMap<i32, HandlerRecord>>,
    subscribe_handler: RwLock<Option<(SubscribeHandler, WorkerHandle)>>,
    auth_hook: RwLock<Option<Box<dyn Fn(&Message, SessionId) -> bool + Send + Sync>>>,
    event_auth_hook: RwLock<Option<Box<dyn Fn(i32, &str, SessionId) -> bool + Send + Sync>>>,
}

impl Object {
    pub fn new(id: ObjectId) -> Self {
        Object {
            id,
            request_handlers: RwLock::new(HashMap::new()),
            subscribe_handler: RwLock::new(None),
            auth_hook: RwLock::new(None),
            event_auth_hook: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Registers a handler for `code`. `worker` follows Open Question 3:
    /// `None` resolves to `context_worker` once, at registration time, not
    /// re-resolved per dispatch.
    pub fn register_request_handler(
        &self,
        code: i32,
        handler: RequestHandler,
        worker: Option<WorkerHandle>,
        context_worker: &WorkerHandle,
    ) {
        let worker = worker.unwrap_or_else(|| context_worker.clone());
        self.request_handlers
            .write()
            .insert(code, HandlerRecord { handler, worker });
    }

    pub fn set_subscribe_handler(
        &self,
        handler: SubscribeHandler,
        worker: Option<WorkerHandle>,
        context_worker: &WorkerHandle,
    ) {
        let worker = worker.unwrap_or_else(|| context_worker.clone());
        *self.subscribe_handler.write() = Some((handler, worker));
    }

    pub fn set_auth_hook(&self, hook: impl Fn(&Message, SessionId) -> bool + Send + Sync + 'static) {
        *self.auth_hook.write() = Some(Box::new(hook));
    }

    pub fn set_event_auth_hook(
        &self,
        hook: impl Fn(i32, &str, SessionId) -> bool + Send + Sync + 'static,
    ) {
        *self.event_auth_hook.write() = Some(Box::new(hook));
    }

    pub fn authenticate(&self, message: &Message, session: SessionId) -> bool {
        match self.auth_hook.read().as_ref() {
            Some(hook) => hook(message, session),
            None => true,
        }
    }

    pub fn authenticate_event(&self, code: i32, topic: &str, session: SessionId) -> bool {
        match self.event_auth_hook.read().as_ref() {
            Some(hook) => hook(code, topic, session),
            None => true,
        }
    }

    /// The worker a request for `code` is migrated to before its handler
    /// runs (spec §4.5). `None` means no handler is registered for `code`.
    pub fn handler_worker(&self, code: i32) -> Option<WorkerHandle> {
        self.request_handlers.read().get(&code).map(|r| r.worker.clone())
    }

    /// Invokes the handler registered for `message.code` inline. Callers
    /// are expected to already be running on that handler's registered
    /// worker (spec §4.5: "delivery is migrated to that worker via an
    /// async job" — the migration itself is the caller's job to arrange,
    /// via [`Object::handler_worker`]). Returns an error for an unknown
    /// code, which the caller turns into a `Status` reply (spec §4.10).
    pub fn dispatch_request(&self, message: &Message, session: SessionId) -> Result<HandlerOutcome, BusError> {
        let table = self.request_handlers.read();
        let record = table.get(&message.code).ok_or_else(|| {
            BusError::dispatch(codes::DISPATCH_UNKNOWN_CODE, format!("no handler for code {}", message.code))
        })?;
        Ok((record.handler)(message, session))
    }

    pub fn notify_subscribe(&self, session: SessionId, manual_update: bool) {
        if let Some((handler, _worker)) = self.subscribe_handler.read().as_ref() {
            handler(SubscribeNotice {
                session,
                object_id: self.id,
                manual_update,
            });
        }
    }
}

pub fn kind_for_registry(manual_update_sub_kind: bool) -> SubscriptionKind {
    if manual_update_sub_kind {
        SubscriptionKind::ManualUpdate
    } else {
        SubscriptionKind::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;

    #[test]
    fn unknown_code_is_a_dispatch_error() {
        let obj = Object::new(ObjectId::new(1));
        let worker = Worker::spawn("test-object-worker");
        let msg = Message::request(ObjectId::new(1), 99, Vec::<u8>::new());
        let err = obj.dispatch_request(&msg, SessionId::next()).unwrap_err();
        assert_eq!(err.code(), codes::DISPATCH_UNKNOWN_CODE);
        drop(worker);
    }

    #[test]
    fn registered_handler_runs_and_can_consume_the_reply() {
        let obj = Object::new(ObjectId::new(1));
        let worker = Worker::spawn("test-object-worker-2");
        let handle = worker.handle();
        obj.register_request_handler(
            7,
            Box::new(|_msg, _session| HandlerOutcome::Consumed),
            None,
            &handle,
        );
        let msg = Message::request(ObjectId::new(1), 7, Vec::<u8>::new());
        assert!(matches!(
            obj.dispatch_request(&msg, SessionId::next()).unwrap(),
            HandlerOutcome::Consumed
        ));
    }

    #[test]
    fn auth_hook_gates_request_authentication() {
        let obj = Object::new(ObjectId::new(1));
        obj.set_auth_hook(|_msg, _session| false);
        let msg = Message::request(ObjectId::new(1), 7, Vec::<u8>::new());
        assert!(!obj.authenticate(&msg, SessionId::next()));
    }
}
