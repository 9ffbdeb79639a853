//! Signature schemes and JSON-LD canonicalization for relaystate federation.

pub mod canon;
pub mod http_signature;
pub mod keys;
pub mod ld_signature;
