//! Chrome DevTools Protocol client.
//!
//! One WebSocket connection to the browser carries every target session. A
//! reader task owns the inbound half; writes serialise through a lock on
//! the outbound half. [`CdpClient`] is the request/reply and subscribe
//! façade handed to the rest of the daemon.

mod client;
mod error;
mod transport;
mod types;

pub use client::{CdpClient, CdpConfig};
pub use error::CdpError;
pub use types::{Event, ProtocolError};
