//! Generated protobuf/gRPC bindings (spec §4.B, §6). Compiled by `build.rs`
//! from `proto/privval.proto` (the sentry wire schema) and
//! `proto/cosigner.proto` (the mutually authenticated cosigner RPC surface).

pub mod privval {
	include!(concat!(env!("OUT_DIR"), "/privval.rs"));
}

pub mod cosigner {
	include!(concat!(env!("OUT_DIR"), "/cosigner.rs"));
}
