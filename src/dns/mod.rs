//! The dns module implements the resolver: wire codec, answer cache,
//! upstream client, resolution engine, trace log and the UDP dispatcher.

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// DNS response caching with TTL support
pub mod cache;

/// DNS client for making outgoing queries
pub mod client;

/// Server configuration and shared context
pub mod context;

/// Upstream resolver discovery and filtering
pub mod netutil;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Iterative and recursive resolution engine
pub mod resolve;

/// UDP DNS server implementation
pub mod server;

/// Per-hop trace events and the CSV trace log
pub mod trace;
