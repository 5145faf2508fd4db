//! Cross-cutting error type for the bus core.
//!
//! Every fallible public operation (bind, connect, `send_sync`, subscribe)
//! returns [`BusError`]. It carries a stable code, a [`ErrorCategory`] that
//! downstream log sinks and metrics can key off without string-matching the
//! message, and an optional boxed source for the underlying I/O or parse
//! failure. Leaf errors internal to one module are plain `thiserror` enums
//! that convert into `BusError` at the module boundary, mirroring how the
//! teacher's transport layer maps `io::Error` into its core error type at
//! the edge rather than deep inside read/write loops.

use std::borrow::Cow;
use std::fmt;

/// §7 error taxonomy: which remediation class a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket create/bind/accept/connect/read/write failure. Session is
    /// marked fatal and pending replies are flushed with `PeerVanish`.
    Transport,
    /// Header parse failure, size mismatch, unknown message type. Session
    /// is marked fatal.
    Framing,
    /// Unknown object id or unknown code. Synthesizes a `Status` reply;
    /// does not tear down the session.
    Dispatch,
    /// Authentication failure on a message or a subscribed event.
    Policy,
    /// Allocation failure on the input buffer, or a full job queue.
    Resource,
    /// A per-request timer expired.
    Timeout,
}

/// Stable, greppable error codes, namespaced `<area>.<reason>`.
pub mod codes {
    pub const TRANSPORT_IO: &str = "transport.io";
    pub const TRANSPORT_BIND_FAILED: &str = "transport.bind_failed";
    pub const TRANSPORT_CONNECT_FAILED: &str = "transport.connect_failed";
    pub const TRANSPORT_PEER_VANISH: &str = "transport.peer_vanish";
    pub const FRAMING_DECODE: &str = "framing.decode";
    pub const FRAMING_SIZE_MISMATCH: &str = "framing.size_mismatch";
    pub const DISPATCH_OBJECT_NOT_FOUND: &str = "dispatch.object_not_found";
    pub const DISPATCH_UNKNOWN_CODE: &str = "dispatch.unknown_code";
    pub const DISPATCH_INVALID_ID: &str = "dispatch.invalid_id";
    pub const POLICY_AUTH_FAILED: &str = "policy.auth_failed";
    pub const RESOURCE_QUEUE_FULL: &str = "resource.queue_full";
    pub const RESOURCE_ALLOC: &str = "resource.alloc";
    pub const TIMEOUT_REQUEST: &str = "timeout.request";
    pub const URL_GRAMMAR: &str = "transport.url_grammar";
}

/// The bus core's stable error type.
///
/// Construct with [`BusError::new`] and chain `with_*` builders, the same
/// shape as the teacher's `CoreError`: a stable code, a human message, an
/// optional category override, and an optional source.
#[derive(Debug)]
pub struct BusError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BusError {
    pub fn new(
        code: &'static str,
        category: ErrorCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convenience constructor for the transport category, mapping an
    /// `io::Error` at the socket boundary.
    pub fn transport(code: &'static str, err: std::io::Error) -> Self {
        Self::new(code, ErrorCategory::Transport, err.to_string()).with_source(err)
    }

    pub fn framing(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Framing, message)
    }

    pub fn dispatch(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Dispatch, message)
    }

    pub fn policy(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Policy, message)
    }

    pub fn resource(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Resource, message)
    }

    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::TIMEOUT_REQUEST, ErrorCategory::Timeout, message)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.code, self.category, self.message)
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
