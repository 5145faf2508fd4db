#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
//! `busline-core`: the transport-agnostic engine of a distributed message
//! bus — session multiplexing, wire framing, request/reply correlation,
//! object dispatch, subscription registry, event cache, name resolution,
//! and the worker/job model that migrates I/O-thread callbacks onto user
//! threads.
//!
//! Concrete `ipc://`/`tcp://`/UDP transports live in `busline-transport`,
//! which implements the [`channel::Channel`]/[`channel::ServerChannel`]/
//! [`channel::DatagramSocket`] traits this crate depends on rather than
//! provides.

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event_cache;
pub mod framing;
pub mod ids;
pub mod io;
pub mod message;
pub mod nameserver;
pub mod object;
pub mod session;
pub mod status;
pub mod subscription;
pub mod url;
pub mod watchdog;
pub mod worker;

pub use endpoint::Endpoint;
pub use error::{BusError, ErrorCategory, Result};
pub use ids::{ObjectId, SessionId};
pub use message::{Message, MessageFlags, MessageKind};
pub use session::{Session, SessionState};
pub use status::Status;
pub use url::BusUrl;
pub use worker::{Worker, WorkerHandle};
