//! Maps `std::io::Error` onto `busline_core::BusError` at the transport
//! boundary, the same edge-mapping pattern the teacher's listener/channel
//! use for `CoreError` (spec §4.2: any socket failure marks the session
//! fatal and is reported through the core's `Transport` category).

use busline_core::error::BusError;

pub fn map_io_error(code: &'static str, err: std::io::Error) -> BusError {
    BusError::transport(code, err)
}
