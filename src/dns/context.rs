//! The `ServerContext` holds the common state across the server

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::dns::cache::SynchronizedCache;
use crate::dns::client::{DnsClient, DnsNetworkClient};
use crate::dns::netutil::{system_nameservers, usable_upstreams};
use crate::dns::trace::TraceLogger;

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Client(crate::dns::client::ClientError),
    Trace(crate::dns::trace::TraceError),
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ContextError>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// The thirteen IPv4 root server addresses, in the order they are tried.
pub const DEFAULT_ROOT_SERVERS: [Ipv4Addr; 13] = [
    Ipv4Addr::new(198, 41, 0, 4),     // a.root-servers.net
    Ipv4Addr::new(199, 9, 14, 201),   // b.root-servers.net
    Ipv4Addr::new(192, 33, 4, 12),    // c.root-servers.net
    Ipv4Addr::new(199, 7, 91, 13),    // d.root-servers.net
    Ipv4Addr::new(192, 203, 230, 10), // e.root-servers.net
    Ipv4Addr::new(192, 5, 5, 241),    // f.root-servers.net
    Ipv4Addr::new(192, 112, 36, 4),   // g.root-servers.net
    Ipv4Addr::new(198, 97, 190, 53),  // h.root-servers.net
    Ipv4Addr::new(192, 36, 148, 17),  // i.root-servers.net
    Ipv4Addr::new(192, 58, 128, 30),  // j.root-servers.net
    Ipv4Addr::new(193, 0, 14, 129),   // k.root-servers.net
    Ipv4Addr::new(199, 7, 83, 42),    // l.root-servers.net
    Ipv4Addr::new(202, 12, 27, 33),   // m.root-servers.net
];

#[derive(Default)]
pub struct ServerStatistics {
    pub udp_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

/// Main server context containing configuration and shared state
///
/// Every component receives this explicitly (wrapped in an `Arc`); there is
/// no process-wide state. The binary constructs one, adjusts the public
/// fields from its command line, and calls `initialize` before handing it
/// to the server.
pub struct ServerContext {
    pub cache: SynchronizedCache,
    pub client: Box<dyn DnsClient + Sync + Send>,
    pub trace_log: TraceLogger,
    pub listen_addr: Ipv4Addr,
    pub dns_port: u16,
    pub timeout: Duration,
    pub force_recursive: bool,
    pub root_servers: Vec<Ipv4Addr>,
    pub upstreams: Vec<Ipv4Addr>,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    pub fn new(trace_log: TraceLogger) -> Result<ServerContext> {
        Ok(ServerContext {
            cache: SynchronizedCache::new(),
            client: Box::new(DnsNetworkClient::new(0, DEFAULT_TIMEOUT)?),
            trace_log,
            listen_addr: Ipv4Addr::UNSPECIFIED,
            dns_port: 53,
            timeout: DEFAULT_TIMEOUT,
            force_recursive: false,
            root_servers: DEFAULT_ROOT_SERVERS.to_vec(),
            upstreams: usable_upstreams(&system_nameservers()),
            statistics: ServerStatistics::default(),
        })
    }

    /// Start the client's worker threads. Must be called once, after the
    /// configuration has settled and before the server starts.
    pub fn initialize(&self) -> Result<()> {
        self.client.run()?;

        Ok(())
    }
}

#[cfg(test)]
pub mod tests {

    use std::sync::Arc;

    use super::*;
    use crate::dns::client::tests::{DnsStubClient, StubCallback};

    pub fn create_test_context(callback: Box<StubCallback>) -> Arc<ServerContext> {
        let path = std::env::temp_dir().join(format!("trace-{}.csv", uuid::Uuid::new_v4()));
        let trace_log = TraceLogger::open(path).unwrap();

        Arc::new(ServerContext {
            cache: SynchronizedCache::new(),
            client: Box::new(DnsStubClient::new(callback)),
            trace_log,
            listen_addr: Ipv4Addr::LOCALHOST,
            dns_port: 0,
            timeout: DEFAULT_TIMEOUT,
            force_recursive: false,
            root_servers: vec![Ipv4Addr::new(198, 41, 0, 4)],
            upstreams: vec![Ipv4Addr::new(8, 8, 8, 8)],
            statistics: ServerStatistics::default(),
        })
    }
}
