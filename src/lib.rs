//! Waypoint is a tracing DNS resolver. It answers A and NS queries over
//! UDP, resolving them either iteratively from the root servers or
//! recursively through upstream resolvers, and records every hop of every
//! resolution attempt in a CSV trace log.

pub mod dns;
