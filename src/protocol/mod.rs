//! Redis Serialization Protocol (RESP2/RESP3) client-side codec.
//!
//! Commands go out as RESP arrays of bulk strings; replies come back as any
//! RESP2 or RESP3 value.

pub mod resp;

pub use resp::*;

/// Marker that opens a cluster redirect notice (`MOVED <slot> <host:port>`).
pub const REDIRECT_MARKER: &str = "MOVED";
