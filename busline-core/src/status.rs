//! Wire-level status codes (spec §6), distinct from [`crate::error::BusError`].
//!
//! A `Status` message carries one of these on the wire; `BusError` is the
//! Rust-side error a caller's future resolves to. The two meet at the
//! boundary: [`Status::from_category`] picks the status a framework-
//! synthesized reply should carry for a given [`crate::error::ErrorCategory`].

use crate::error::ErrorCategory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    UnableToSend = 1,
    Timeout = 2,
    PeerVanish = 3,
    ObjectNotFound = 4,
    AuthenticationFail = 5,
    MsgDecodeFail = 6,
    InvalidId = 7,
    Unknown = 8,
    AutoReplyOk = 9,
}

impl Status {
    pub fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Transport => Status::UnableToSend,
            ErrorCategory::Framing => Status::MsgDecodeFail,
            ErrorCategory::Dispatch => Status::ObjectNotFound,
            ErrorCategory::Policy => Status::AuthenticationFail,
            ErrorCategory::Resource => Status::UnableToSend,
            ErrorCategory::Timeout => Status::Timeout,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok | Status::AutoReplyOk)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::Ok,
            1 => Status::UnableToSend,
            2 => Status::Timeout,
            3 => Status::PeerVanish,
            4 => Status::ObjectNotFound,
            5 => Status::AuthenticationFail,
            6 => Status::MsgDecodeFail,
            7 => Status::InvalidId,
            9 => Status::AutoReplyOk,
            _ => Status::Unknown,
        }
    }
}
