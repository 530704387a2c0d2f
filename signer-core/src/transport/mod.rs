//! Secret transport (spec §4.A): an authenticated, encrypted channel to a
//! sentry/validator node, built from a handshake (`handshake`) and a sealed
//! framing layer (`framing`). The OS-level socket accept/connect loop itself
//! lives in `connector`.

pub mod framing;
pub mod handshake;

pub use framing::SealedChannel;
pub use handshake::{Identity, SessionKeys};
