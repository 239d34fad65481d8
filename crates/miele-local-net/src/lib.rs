//! Networking layer for the Miele local protocol
//!
//! This crate provides:
//! - the signed-and-encrypted HTTP transport
//! - DOP2 leaf reads and writes over that transport
//! - error-tolerant DOP2 tree walking
//! - per-appliance endpoint sessions and summary annotation

pub mod api;
pub mod dop2;
pub mod session;
pub mod transport;
pub mod walker;

pub use dop2::{Dop2Client, Dop2Coordinate};
pub use session::{EndpointSession, EndpointStatus};
pub use transport::{DecryptedResponse, ResponseMeta, Transport};
pub use walker::{WalkOutcome, WalkReport};
