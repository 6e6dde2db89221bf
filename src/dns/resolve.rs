//! the resolution engine, driving iterative and recursive lookups

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};

use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType, ResultCode};
use crate::dns::trace::{CacheStatus, ResolveMode, TraceEvent};

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    Client(crate::dns::client::ClientError),
    Cache(crate::dns::cache::CacheError),
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ResolveError>;

/// Referral chains longer than this indicate a delegation loop.
const MAX_REFERRALS: usize = 16;

/// Delegation depth below the root, as recorded in the `step` column.
/// Real-world delegations can be deeper than three levels, but everything
/// past the TLD is labelled as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Root,
    Tld,
    Authoritative,
}

impl Phase {
    fn label(&self) -> &'static str {
        match *self {
            Phase::Root => "Root",
            Phase::Tld => "TLD",
            Phase::Authoritative => "Authoritative",
        }
    }

    fn advanced(&self) -> Phase {
        match *self {
            Phase::Root => Phase::Tld,
            Phase::Tld => Phase::Authoritative,
            Phase::Authoritative => Phase::Authoritative,
        }
    }
}

/// What a resolution produced: the answer set, the response code to return
/// to the client, and the trace of every server interaction along the way.
/// The mode is decided once per request and stamped on every trace row,
/// even when a recursive attempt fell back to the iterative walk.
pub struct ResolutionOutcome {
    pub answers: Vec<DnsRecord>,
    pub rcode: ResultCode,
    pub mode: ResolveMode,
    pub trace: Vec<TraceEvent>,
    pub cache_hit: bool,
}

/// The resolution engine
///
/// One engine is shared by all request workers; it holds no per-request
/// state, so resolutions for different clients proceed independently. The
/// engine consults the cache first, then attempts recursive delegation to
/// the upstream resolvers when the client asked for it, and finally walks
/// the hierarchy itself from the root servers down.
pub struct ResolutionEngine {
    context: Arc<ServerContext>,
}

impl ResolutionEngine {
    pub fn new(context: Arc<ServerContext>) -> ResolutionEngine {
        ResolutionEngine { context }
    }

    pub fn resolve(
        &self,
        qname: &str,
        qtype: QueryType,
        recursion_requested: bool,
    ) -> Result<ResolutionOutcome> {
        log::info!("attempting to resolve {:?} {}", qtype, qname);

        let recursive = recursion_requested || self.context.force_recursive;
        let mode = if recursive {
            ResolveMode::Recursive
        } else {
            ResolveMode::Iterative
        };

        if let QueryType::Unknown(_) = qtype {
            return Ok(ResolutionOutcome {
                answers: Vec::new(),
                rcode: ResultCode::NOTIMP,
                mode,
                trace: Vec::new(),
                cache_hit: false,
            });
        }

        if let Some(answers) = self.context.cache.lookup(qname, qtype)? {
            log::debug!("serving {} from cache", qname);

            let event = TraceEvent::new(
                "CACHE".to_string(),
                "CACHE",
                "ANSWER_FROM_CACHE".to_string(),
                Duration::from_secs(0),
                Duration::from_secs(0),
                CacheStatus::Hit,
            );

            return Ok(ResolutionOutcome {
                answers,
                rcode: ResultCode::NOERROR,
                mode,
                trace: vec![event],
                cache_hit: true,
            });
        }

        let start = Instant::now();
        let mut trace = Vec::new();

        if recursive {
            if let Some((answers, rcode)) = self.recursive_pass(qname, qtype, start, &mut trace)? {
                return Ok(ResolutionOutcome {
                    answers,
                    rcode,
                    mode,
                    trace,
                    cache_hit: false,
                });
            }

            log::debug!("recursive attempt for {} failed, walking the hierarchy", qname);
        }

        let (answers, rcode) = self.iterative_pass(qname, qtype, start, &mut trace)?;

        Ok(ResolutionOutcome {
            answers,
            rcode,
            mode,
            trace,
            cache_hit: false,
        })
    }

    /// Delegate the whole resolution to the configured upstreams. A single
    /// trace event covers the attempt: the answering upstream's verdict, or
    /// TIMEOUT when none of them responded. Returns `None` when the caller
    /// should fall back to walking the hierarchy itself.
    fn recursive_pass(
        &self,
        qname: &str,
        qtype: QueryType,
        start: Instant,
        trace: &mut Vec<TraceEvent>,
    ) -> Result<Option<(Vec<DnsRecord>, ResultCode)>> {
        let mut last_server = None;

        for upstream in &self.context.upstreams {
            let server = upstream.to_string();
            let sent_at = Instant::now();

            let response =
                match self
                    .context
                    .client
                    .send_query(qname, qtype, (server.as_str(), 53), true)
                {
                    Ok(response) => response,
                    Err(e) => {
                        log::debug!("upstream {} did not answer for {}: {}", server, qname, e);
                        last_server = Some(server);
                        continue;
                    }
                };

            let rcode = response.header.rescode;
            let answered = rcode == ResultCode::NOERROR && !response.answers.is_empty();

            trace.push(TraceEvent::new(
                server,
                "Recursive",
                if answered {
                    "ANSWER".to_string()
                } else {
                    rcode.as_str().to_string()
                },
                sent_at.elapsed(),
                start.elapsed(),
                CacheStatus::Miss,
            ));

            if answered {
                self.context.cache.store(qname, qtype, &response.answers)?;
                return Ok(Some((response.answers, rcode)));
            }

            // The upstream spoke, but had no answer for us. Its verdict is
            // on record; the iterative pass takes over from here.
            return Ok(None);
        }

        if let Some(server) = last_server {
            trace.push(TraceEvent::new(
                server,
                "Recursive",
                "TIMEOUT".to_string(),
                self.context.timeout,
                start.elapsed(),
                CacheStatus::Miss,
            ));
        }

        Ok(None)
    }

    /// Walk the delegation hierarchy from the root servers down. Servers in
    /// the current candidate set are tried in order; the first one to
    /// respond decides how the walk continues.
    fn iterative_pass(
        &self,
        qname: &str,
        qtype: QueryType,
        start: Instant,
        trace: &mut Vec<TraceEvent>,
    ) -> Result<(Vec<DnsRecord>, ResultCode)> {
        let mut candidates = self.context.root_servers.clone();
        let mut phase = Phase::Root;
        let mut last_rcode = None;
        let mut referrals = 0;

        'walk: loop {
            for server_addr in candidates.clone() {
                let server = server_addr.to_string();
                let sent_at = Instant::now();

                let response = match self.context.client.send_query(
                    qname,
                    qtype,
                    (server.as_str(), 53),
                    false,
                ) {
                    Ok(response) => response,
                    Err(e) => {
                        log::debug!("{} did not answer for {}: {}", server, qname, e);

                        trace.push(TraceEvent::new(
                            server,
                            phase.label(),
                            "TIMEOUT".to_string(),
                            sent_at.elapsed(),
                            start.elapsed(),
                            CacheStatus::Miss,
                        ));

                        continue;
                    }
                };

                let rtt = sent_at.elapsed();
                let rcode = response.header.rescode;

                trace.push(TraceEvent::new(
                    server.clone(),
                    phase.label(),
                    summarize(&response),
                    rtt,
                    start.elapsed(),
                    CacheStatus::Miss,
                ));

                if rcode == ResultCode::NXDOMAIN {
                    return Ok((Vec::new(), ResultCode::NXDOMAIN));
                }

                if rcode == ResultCode::NOERROR && !response.answers.is_empty() {
                    self.context.cache.store(qname, qtype, &response.answers)?;
                    return Ok((response.answers, rcode));
                }

                last_rcode = Some(rcode);

                // Glue addresses make the next candidate set directly
                let glue = response.glue_addresses();
                if !glue.is_empty() {
                    referrals += 1;
                    if referrals > MAX_REFERRALS {
                        break 'walk;
                    }

                    candidates = glue;
                    phase = phase.advanced();
                    continue 'walk;
                }

                // A glueless referral names the servers without addressing
                // them; resolve the names through the upstreams
                let hosts = response.referral_hosts();
                if !hosts.is_empty() {
                    let addrs = self.resolve_ns_addresses(&hosts);

                    if addrs.is_empty() {
                        // Dead referral; another server at this level may
                        // know a live one
                        log::debug!(
                            "referral from {} for {} yielded no addresses",
                            server,
                            qname
                        );
                        continue;
                    }

                    referrals += 1;
                    if referrals > MAX_REFERRALS {
                        break 'walk;
                    }

                    candidates = addrs;
                    phase = phase.advanced();
                    continue 'walk;
                }

                // Neither answer nor referral, move to the next candidate
            }

            // Every candidate was tried without producing a way forward
            break 'walk;
        }

        Ok((Vec::new(), last_rcode.unwrap_or(ResultCode::SERVFAIL)))
    }

    /// Resolve the addresses behind a glueless referral. Every nameserver
    /// name is looked up through the upstream resolvers and the addresses
    /// are collected in referral order, so a dead first nameserver still
    /// leaves the rest as candidates. These secondary lookups are
    /// deliberately absent from the trace, which records only the servers
    /// contacted for the client's own question.
    fn resolve_ns_addresses(&self, hosts: &[String]) -> Vec<Ipv4Addr> {
        let mut addrs = Vec::new();

        for host in hosts {
            for upstream in &self.context.upstreams {
                let server = upstream.to_string();

                let response = match self.context.client.send_query(
                    host,
                    QueryType::A,
                    (server.as_str(), 53),
                    true,
                ) {
                    Ok(response) => response,
                    Err(_) => continue,
                };

                let host_addrs: Vec<Ipv4Addr> = response
                    .answers
                    .iter()
                    .filter_map(|rec| match rec {
                        DnsRecord::A { addr, .. } => Some(*addr),
                        _ => None,
                    })
                    .collect();

                if !host_addrs.is_empty() {
                    addrs.extend(host_addrs);
                    break;
                }
            }
        }

        addrs
    }
}

/// Condense a response into the `response_or_referral` column: an answer,
/// an error code, or the (sorted, deduplicated) list of referred
/// nameservers.
fn summarize(response: &DnsPacket) -> String {
    if response.header.rescode == ResultCode::NXDOMAIN {
        return "NXDOMAIN".to_string();
    }

    if response.header.rescode == ResultCode::NOERROR && !response.answers.is_empty() {
        return "ANSWER".to_string();
    }

    let mut hosts = response.referral_hosts();
    if !hosts.is_empty() {
        hosts.sort();
        hosts.dedup();
        return format!("REFERRAL {}", hosts.join(","));
    }

    response.header.rescode.as_str().to_string()
}

#[cfg(test)]
mod tests {

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dns::client::ClientError;
    use crate::dns::context::tests::create_test_context;
    use crate::dns::protocol::DnsQuestion;

    fn a_answer(qname: &str, addr: &str, ttl: u32) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), QueryType::A));
        packet.answers.push(DnsRecord::A {
            domain: qname.to_string(),
            addr: addr.parse().unwrap(),
            ttl,
        });
        packet
    }

    fn referral(zone: &str, host: &str, glue: Option<&str>) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.authorities.push(DnsRecord::Ns {
            domain: zone.to_string(),
            host: host.to_string(),
            ttl: 172800,
        });
        if let Some(addr) = glue {
            packet.resources.push(DnsRecord::A {
                domain: host.to_string(),
                addr: addr.parse().unwrap(),
                ttl: 172800,
            });
        }
        packet
    }

    #[test]
    fn test_unknown_qtype_is_notimp() {
        let context = create_test_context(Box::new(|_, _, _, _| {
            panic!("no server should be contacted");
        }));
        let engine = ResolutionEngine::new(context);

        let outcome = engine
            .resolve("example.com", QueryType::Unknown(16), false)
            .unwrap();

        assert_eq!(ResultCode::NOTIMP, outcome.rcode);
        assert!(outcome.answers.is_empty());
        assert!(outcome.trace.is_empty());
    }

    #[test]
    fn test_cache_hit_produces_single_hit_event() {
        let context = create_test_context(Box::new(|_, _, _, _| {
            panic!("no server should be contacted");
        }));

        context
            .cache
            .store(
                "example.com",
                QueryType::A,
                &[DnsRecord::A {
                    domain: "example.com".to_string(),
                    addr: "93.184.216.34".parse().unwrap(),
                    ttl: 300,
                }],
            )
            .unwrap();

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert!(outcome.cache_hit);
        assert_eq!(ResultCode::NOERROR, outcome.rcode);
        assert_eq!(ResolveMode::Iterative, outcome.mode);
        assert_eq!(1, outcome.answers.len());

        assert_eq!(1, outcome.trace.len());
        let event = &outcome.trace[0];
        assert_eq!("CACHE", event.server);
        assert_eq!("CACHE", event.step);
        assert_eq!("ANSWER_FROM_CACHE", event.response);
        assert_eq!(CacheStatus::Hit, event.cache_status);
        assert_eq!(Duration::from_secs(0), event.rtt);
        assert_eq!(Duration::from_secs(0), event.total);
    }

    #[test]
    fn test_timeouts_then_referral_glue_becomes_candidates() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            match server {
                // First two roots never answer
                "198.41.0.4" | "199.9.14.201" => Err(ClientError::TimeOut),
                // The third root refers to a TLD server with glue
                "192.33.4.12" => Ok(referral("com", "a.gtld-servers.net", Some("192.5.6.30"))),
                // The TLD server answers directly
                "192.5.6.30" => Ok(a_answer(qname, "93.184.216.34", 300)),
                other => panic!("unexpected server {}", other),
            }
        }));

        let mut context = context;
        match Arc::get_mut(&mut context) {
            Some(ctx) => {
                ctx.root_servers = vec![
                    "198.41.0.4".parse().unwrap(),
                    "199.9.14.201".parse().unwrap(),
                    "192.33.4.12".parse().unwrap(),
                ];
            }
            None => panic!(),
        }

        let engine = ResolutionEngine::new(context.clone());
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);
        assert_eq!(1, outcome.answers.len());

        let steps: Vec<(&str, &str)> = outcome
            .trace
            .iter()
            .map(|e| (e.step, e.response.as_str()))
            .collect();
        assert_eq!(
            vec![
                ("Root", "TIMEOUT"),
                ("Root", "TIMEOUT"),
                ("Root", "REFERRAL a.gtld-servers.net"),
                ("TLD", "ANSWER"),
            ],
            steps
        );

        // The answer was cached under the queried name
        assert!(context
            .cache
            .lookup("example.com", QueryType::A)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_glueless_referral_resolved_through_upstreams() {
        let context = create_test_context(Box::new(|qname, _, (server, _), recursive| {
            match server {
                // Root refers without glue
                "198.41.0.4" => {
                    assert!(!recursive);
                    Ok(referral("com", "ns1.nic.com", None))
                }
                // The test context's sole upstream resolves the nameserver
                "8.8.8.8" => {
                    assert!(recursive);
                    assert_eq!("ns1.nic.com", qname);
                    Ok(a_answer("ns1.nic.com", "10.9.9.9", 3600))
                }
                // And the referred server answers
                "10.9.9.9" => Ok(a_answer(qname, "93.184.216.34", 300)),
                other => panic!("unexpected server {}", other),
            }
        }));

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);

        let steps: Vec<(&str, &str)> = outcome
            .trace
            .iter()
            .map(|e| (e.step, e.response.as_str()))
            .collect();
        assert_eq!(
            vec![("Root", "REFERRAL ns1.nic.com"), ("TLD", "ANSWER")],
            steps
        );
    }

    #[test]
    fn test_glueless_referral_keeps_all_nameserver_addresses() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            match server {
                // Root names two servers, neither with glue
                "198.41.0.4" => {
                    let mut packet = DnsPacket::new();
                    for host in &["dead.ns.example", "live.ns.example"] {
                        packet.authorities.push(DnsRecord::Ns {
                            domain: "com".to_string(),
                            host: host.to_string(),
                            ttl: 172800,
                        });
                    }
                    Ok(packet)
                }
                // The upstream has an address for both names
                "8.8.8.8" => match qname {
                    "dead.ns.example" => Ok(a_answer(qname, "10.0.0.66", 3600)),
                    "live.ns.example" => Ok(a_answer(qname, "10.0.0.77", 3600)),
                    other => panic!("unexpected upstream query {}", other),
                },
                // The first nameserver is unreachable, the second answers
                "10.0.0.66" => Err(ClientError::TimeOut),
                "10.0.0.77" => Ok(a_answer(qname, "93.184.216.34", 300)),
                other => panic!("unexpected server {}", other),
            }
        }));

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);
        assert_eq!(1, outcome.answers.len());

        let steps: Vec<(&str, &str)> = outcome
            .trace
            .iter()
            .map(|e| (e.step, e.response.as_str()))
            .collect();
        assert_eq!(
            vec![
                ("Root", "REFERRAL dead.ns.example,live.ns.example"),
                ("TLD", "TIMEOUT"),
                ("TLD", "ANSWER"),
            ],
            steps
        );
    }

    #[test]
    fn test_dead_referral_tries_next_same_phase_server() {
        let context = create_test_context(Box::new(|qname, qtype, (server, _), _| {
            match server {
                // First root names a server nobody can find an address for
                "198.41.0.4" => Ok(referral("com", "ghost.example.net", None)),
                // The upstream has no address for it
                "8.8.8.8" => {
                    assert_eq!(QueryType::A, qtype);
                    assert_eq!("ghost.example.net", qname);
                    let mut packet = DnsPacket::new();
                    packet.header.rescode = ResultCode::NXDOMAIN;
                    Ok(packet)
                }
                // The second root has a live referral
                "199.9.14.201" => Ok(referral("com", "a.gtld-servers.net", Some("192.5.6.30"))),
                "192.5.6.30" => Ok(a_answer(qname, "93.184.216.34", 300)),
                other => panic!("unexpected server {}", other),
            }
        }));

        let mut context = context;
        match Arc::get_mut(&mut context) {
            Some(ctx) => {
                ctx.root_servers = vec![
                    "198.41.0.4".parse().unwrap(),
                    "199.9.14.201".parse().unwrap(),
                ];
            }
            None => panic!(),
        }

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);

        let steps: Vec<(&str, &str)> = outcome
            .trace
            .iter()
            .map(|e| (e.step, e.response.as_str()))
            .collect();
        assert_eq!(
            vec![
                ("Root", "REFERRAL ghost.example.net"),
                ("Root", "REFERRAL a.gtld-servers.net"),
                ("TLD", "ANSWER"),
            ],
            steps
        );
    }

    #[test]
    fn test_nxdomain_terminates_without_caching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_stub = calls.clone();

        let context = create_test_context(Box::new(move |_, _, _, _| {
            calls_in_stub.fetch_add(1, Ordering::SeqCst);
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NXDOMAIN;
            Ok(packet)
        }));

        let engine = ResolutionEngine::new(context.clone());

        let outcome = engine.resolve("nosuch.example", QueryType::A, false).unwrap();
        assert_eq!(ResultCode::NXDOMAIN, outcome.rcode);
        assert!(outcome.answers.is_empty());
        assert_eq!(1, outcome.trace.len());
        assert_eq!("NXDOMAIN", outcome.trace[0].response);

        assert!(context
            .cache
            .lookup("nosuch.example", QueryType::A)
            .unwrap()
            .is_none());

        // A second resolution must hit the network again
        let outcome = engine.resolve("nosuch.example", QueryType::A, false).unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recursive_falls_back_to_iterative() {
        let context = create_test_context(Box::new(|qname, _, (server, _), recursive| {
            if recursive {
                // The upstream never answers
                assert_eq!("8.8.8.8", server);
                return Err(ClientError::TimeOut);
            }

            assert_eq!("198.41.0.4", server);
            Ok(a_answer(qname, "93.184.216.34", 300))
        }));

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, true).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);
        assert_eq!(1, outcome.answers.len());

        // Hops from both passes, but the request itself stays recursive
        assert_eq!(ResolveMode::Recursive, outcome.mode);
        assert_eq!(2, outcome.trace.len());
        assert_eq!("Recursive", outcome.trace[0].step);
        assert_eq!("TIMEOUT", outcome.trace[0].response);
        assert_eq!("Root", outcome.trace[1].step);
        assert_eq!("ANSWER", outcome.trace[1].response);
    }

    #[test]
    fn test_recursive_success_skips_iteration() {
        let context = create_test_context(Box::new(|qname, _, (server, _), recursive| {
            assert!(recursive);
            assert_eq!("8.8.8.8", server);
            Ok(a_answer(qname, "93.184.216.34", 300))
        }));

        let engine = ResolutionEngine::new(context.clone());
        let outcome = engine.resolve("example.com", QueryType::A, true).unwrap();

        assert_eq!(ResultCode::NOERROR, outcome.rcode);
        assert_eq!(ResolveMode::Recursive, outcome.mode);
        assert_eq!(1, outcome.trace.len());
        assert_eq!("Recursive", outcome.trace[0].step);
        assert_eq!("ANSWER", outcome.trace[0].response);

        assert!(context
            .cache
            .lookup("example.com", QueryType::A)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_phase_caps_at_authoritative() {
        let context = create_test_context(Box::new(|qname, _, (server, _), _| {
            match server {
                "198.41.0.4" => Ok(referral("com", "tld.example.net", Some("10.0.0.1"))),
                "10.0.0.1" => Ok(referral("example.com", "ns.example.com", Some("10.0.0.2"))),
                "10.0.0.2" => Ok(referral(
                    "deep.example.com",
                    "ns.deep.example.com",
                    Some("10.0.0.3"),
                )),
                "10.0.0.3" => Ok(a_answer(qname, "93.184.216.34", 300)),
                other => panic!("unexpected server {}", other),
            }
        }));

        let engine = ResolutionEngine::new(context);
        let outcome = engine
            .resolve("www.deep.example.com", QueryType::A, false)
            .unwrap();

        let steps: Vec<&str> = outcome.trace.iter().map(|e| e.step).collect();
        assert_eq!(vec!["Root", "TLD", "Authoritative", "Authoritative"], steps);
    }

    #[test]
    fn test_exhaustion_defaults_to_servfail() {
        let context = create_test_context(Box::new(|_, _, _, _| Err(ClientError::TimeOut)));

        let engine = ResolutionEngine::new(context);
        let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();

        assert_eq!(ResultCode::SERVFAIL, outcome.rcode);
        assert!(outcome.answers.is_empty());
        assert_eq!(1, outcome.trace.len());
        assert_eq!("TIMEOUT", outcome.trace[0].response);
    }

    #[test]
    fn test_concurrent_resolutions_share_the_cache() {
        let context = create_test_context(Box::new(|qname, _, _, _| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(a_answer(qname, "93.184.216.34", 300))
        }));

        let engine = Arc::new(ResolutionEngine::new(context.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(std::thread::spawn(move || {
                let outcome = engine.resolve("example.com", QueryType::A, false).unwrap();
                assert_eq!(ResultCode::NOERROR, outcome.rcode);
                assert_eq!(1, outcome.answers.len());
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let records = context
            .cache
            .lookup("example.com", QueryType::A)
            .unwrap()
            .unwrap();
        assert_eq!(
            vec![DnsRecord::A {
                domain: "example.com".to_string(),
                addr: "93.184.216.34".parse().unwrap(),
                ttl: 300,
            }],
            records
        );
    }
}
