//! §3 data model: `Message`, its kind tag, and the flags bitset.
//!
//! Field order and numeric tags match spec §6 exactly (stable on the wire);
//! [`crate::framing`] is what actually serializes a `Message` into bytes.

use std::sync::Arc;

use crate::ids::{ObjectId, SessionId};

/// Numeric tag on the wire (spec §6). `Unknown` is never sent; it is the
/// framing layer's signal that an unrecognized tag arrived, which makes the
/// session fatal per §4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Unknown = 0,
    Request = 1,
    Reply = 2,
    SubscribeRequest = 3,
    Broadcast = 4,
    SidebandRequest = 5,
    SidebandReply = 6,
    Status = 7,
    GetEvent = 8,
    ReturnEvent = 9,
    Publish = 10,
}

impl MessageKind {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => MessageKind::Request,
            2 => MessageKind::Reply,
            3 => MessageKind::SubscribeRequest,
            4 => MessageKind::Broadcast,
            5 => MessageKind::SidebandRequest,
            6 => MessageKind::SidebandReply,
            7 => MessageKind::Status,
            8 => MessageKind::GetEvent,
            9 => MessageKind::ReturnEvent,
            10 => MessageKind::Publish,
            _ => MessageKind::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Kinds that allocate a serial and register a pending-reply entry.
    pub fn is_request_like(self) -> bool {
        matches!(
            self,
            MessageKind::Request | MessageKind::SidebandRequest | MessageKind::GetEvent
        )
    }

    /// Kinds that complete a pending-reply entry.
    pub fn is_reply_like(self) -> bool {
        matches!(
            self,
            MessageKind::Reply
                | MessageKind::Status
                | MessageKind::SidebandReply
                | MessageKind::ReturnEvent
        )
    }
}

bitflags::bitflags! {
    /// Flag bits (spec §6), stable on the wire. Sender and receiver may
    /// differ in which optional header fields are present (§4.3); the
    /// flags themselves are always transmitted as one `u32`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MessageFlags: u32 {
        const ERROR               = 1 << 0;
        const STATUS              = 1 << 1;
        const INITIAL_RESPONSE    = 1 << 2;
        const ENABLE_LOG          = 1 << 3;
        const MANUAL_UPDATE       = 1 << 4;
        const NO_REPLY_EXPECTED   = 1 << 5;
        const FORCE_UPDATE        = 1 << 6;
        const PREFER_UDP          = 1 << 7;
        const HEAD_BUILT          = 1 << 8;
        const EXTERNAL_BUFFER     = 1 << 9;
        const ENDPOINT_ROUTED     = 1 << 10;
        const SYNC_REPLY          = 1 << 11;
        const AUTO_REPLY          = 1 << 12;
        const REPLIED             = 1 << 13;
        const DO_NOT_LOG          = 1 << 14;
    }
}

/// Nanosecond timestamps captured opportunistically along a request's path
/// (spec §3). All four are optional on the wire via the header's options
/// bitmap (§4.3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageTimestamps {
    pub send_ns: Option<u64>,
    pub arrive_ns: Option<u64>,
    pub reply_ns: Option<u64>,
    pub receive_ns: Option<u64>,
}

/// Where a message is headed: a specific session (unicast reply/request) or
/// every subscriber of a topic on an endpoint (broadcast fan-out).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Session(SessionId),
    Endpoint,
}

/// The value type carried across the wire and between the I/O layer, the
/// pending-reply table, and migrated worker callbacks.
///
/// Payload is `Arc<[u8]>` rather than `Vec<u8>`: the same message is
/// referenced by the pending-reply table (for a synchronous waiter) and by
/// an async handler migrated to a worker, and a broadcast is fanned out to
/// every subscribing session without re-copying the payload (§4.6 "multi-
/// dispatch" still clones the *message*, not the bytes, per handler).
#[derive(Clone, Debug)]
pub struct Message {
    pub kind: MessageKind,
    pub code: i32,
    pub serial: i32,
    pub flags: MessageFlags,
    pub destination: Destination,
    pub object_id: ObjectId,
    pub topic: String,
    pub payload: Arc<[u8]>,
    pub timestamps: MessageTimestamps,
}

impl Message {
    pub fn request(object_id: ObjectId, code: i32, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind: MessageKind::Request,
            code,
            serial: 0,
            flags: MessageFlags::empty(),
            destination: Destination::Endpoint,
            object_id,
            topic: String::new(),
            payload: payload.into(),
            timestamps: MessageTimestamps::default(),
        }
    }

    /// Builds the reply to this message. A `GetEvent` request replies with
    /// `ReturnEvent`, matching the original `doRequest`/`doReply` pairing
    /// (`FDB_MT_GET_EVENT` -> `FDB_MT_RETURN_EVENT`); every other
    /// request-like kind replies with `Reply`.
    pub fn reply_to(&self, session: SessionId, payload: impl Into<Arc<[u8]>>) -> Self {
        let kind = if self.kind == MessageKind::GetEvent {
            MessageKind::ReturnEvent
        } else {
            MessageKind::Reply
        };
        Self {
            kind,
            code: self.code,
            serial: self.serial,
            flags: MessageFlags::empty(),
            destination: Destination::Session(session),
            object_id: self.object_id,
            topic: String::new(),
            payload: payload.into(),
            timestamps: MessageTimestamps::default(),
        }
    }

    pub fn status_to(&self, session: SessionId, status: crate::status::Status) -> Self {
        Self {
            kind: MessageKind::Status,
            code: status.as_u8() as i32,
            serial: self.serial,
            flags: MessageFlags::STATUS
                | if status.is_ok() {
                    MessageFlags::empty()
                } else {
                    MessageFlags::ERROR
                },
            destination: Destination::Session(session),
            object_id: self.object_id,
            topic: String::new(),
            payload: Arc::from(&[][..]),
            timestamps: MessageTimestamps::default(),
        }
    }

    pub fn broadcast(
        object_id: ObjectId,
        code: i32,
        topic: impl Into<String>,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            code,
            serial: 0,
            flags: MessageFlags::empty(),
            destination: Destination::Endpoint,
            object_id,
            topic: topic.into(),
            payload: payload.into(),
            timestamps: MessageTimestamps::default(),
        }
    }

    pub fn with_force_update(mut self, force: bool) -> Self {
        self.flags.set(MessageFlags::FORCE_UPDATE, force);
        self
    }

    /// Per-handler fan-out clone for multi-dispatch (§4.6): distinct
    /// `Message` value, same `Arc<[u8]>` payload buffer.
    pub fn clone_for_dispatch(&self) -> Self {
        self.clone()
    }
}
