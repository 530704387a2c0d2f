//! Cosigner peer layer (spec §4.G): mutually authenticated gRPC between
//! cosigners, carrying nonce exchange, partial-signature collection, and the
//! Raft RPCs (§4.I) on one shared `tonic` service.

pub mod client;
pub mod secure_channel;
pub mod service;

pub use client::{PeerClient, PEER_CALL_DEADLINE};
pub use secure_channel::{authenticated_incoming, PeerIdentity, SecureStream};
pub use service::{CosignerService, PeerHandler};
