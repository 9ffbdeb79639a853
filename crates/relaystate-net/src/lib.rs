//! Signed outbound transport and actor resolution for relaystate federation.

pub mod http_client;
pub mod key_cache;
pub mod resolver;
