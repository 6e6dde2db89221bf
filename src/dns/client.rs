//! client for sending DNS queries to upstream servers

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{sleep, Builder};
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use rand::random;

use crate::dns::buffer::BytePacketBuffer;
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Protocol(crate::dns::protocol::ProtocolError),
    Io(std::io::Error),
    PoisonedLock,
    LookupFailed,
    TimeOut,
}

type Result<T> = std::result::Result<T, ClientError>;

pub trait DnsClient {
    fn get_sent_count(&self) -> usize;
    fn get_failed_count(&self) -> usize;

    fn run(&self) -> Result<()>;
    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (&str, u16),
        recursive: bool,
    ) -> Result<DnsPacket>;
}

/// The UDP client
///
/// This includes a fair bit of synchronization due to the stateless nature of UDP.
/// When many queries are sent in parallell, the response packets can come back
/// in any order. For that reason, we fire off queries on the sending thread, but
/// handle responses on a single worker thread. A channel is created for every
/// query, and the caller blocks on the channel until a response arrives or the
/// timeout sweeper gives up on it.
pub struct DnsNetworkClient {
    total_sent: Arc<AtomicUsize>,
    total_failed: Arc<AtomicUsize>,

    /// The socket all queries are sent from
    socket: Arc<UdpSocket>,

    /// Queries in progress
    pending_queries: Arc<Mutex<Vec<PendingQuery>>>,

    /// How long a query may remain unanswered
    timeout: Duration,
}

/// A query in progress. This struct holds the id of the request, and a channel
/// endpoint for returning the response to the thread that posed the query.
struct PendingQuery {
    id: u16,
    sent_at: Instant,
    tx: Sender<Option<DnsPacket>>,
}

impl DnsNetworkClient {
    pub fn new(port: u16, timeout: Duration) -> Result<DnsNetworkClient> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;

        Ok(DnsNetworkClient {
            total_sent: Arc::new(AtomicUsize::new(0)),
            total_failed: Arc::new(AtomicUsize::new(0)),
            socket: Arc::new(socket),
            pending_queries: Arc::new(Mutex::new(Vec::new())),
            timeout,
        })
    }

    /// Send a DNS query over UDP
    ///
    /// The query is sent from the calling thread, but the response is read on
    /// the worker thread and handed back through a channel. The transaction id
    /// is chosen at random, re-rolling any id already in flight, so concurrent
    /// queries cannot collide and answers cannot be confused.
    pub fn send_udp_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (&str, u16),
        recursive: bool,
    ) -> Result<DnsPacket> {
        let _ = self.total_sent.fetch_add(1, Ordering::Release);

        let (tx, rx) = channel();

        // Pick an id and register the pending query in one critical section,
        // so no two in-flight queries ever share an id.
        let id = {
            let mut pending_queries = self
                .pending_queries
                .lock()
                .map_err(|_| ClientError::PoisonedLock)?;

            let mut id: u16 = random();
            while pending_queries.iter().any(|q| q.id == id) {
                id = random();
            }

            pending_queries.push(PendingQuery {
                id,
                sent_at: Instant::now(),
                tx,
            });

            id
        };

        // Prepare request
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.questions = 1;
        packet.header.recursion_desired = recursive;

        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));

        // Send query
        let mut req_buffer = BytePacketBuffer::new();
        packet.write(&mut req_buffer, 512)?;
        self.socket
            .send_to(&req_buffer.buf[0..req_buffer.pos], server)?;

        // Wait for response
        match rx.recv() {
            Ok(Some(qr)) => Ok(qr),
            Ok(None) => {
                let _ = self.total_failed.fetch_add(1, Ordering::Release);
                Err(ClientError::TimeOut)
            }
            Err(_) => {
                let _ = self.total_failed.fetch_add(1, Ordering::Release);
                Err(ClientError::LookupFailed)
            }
        }
    }
}

impl DnsClient for DnsNetworkClient {
    fn get_sent_count(&self) -> usize {
        self.total_sent.load(Ordering::Acquire)
    }

    fn get_failed_count(&self) -> usize {
        self.total_failed.load(Ordering::Acquire)
    }

    /// The run method launches the worker threads. Unless they are running,
    /// no responses will ever be delivered and callers would block forever.
    fn run(&self) -> Result<()> {
        // Start the thread for handling incoming responses
        {
            let socket_copy = self.socket.try_clone()?;
            let pending_queries_lock = self.pending_queries.clone();

            Builder::new()
                .name("DnsNetworkClient-worker-thread".into())
                .spawn(move || {
                    loop {
                        // Read data into a buffer
                        let mut res_buffer = BytePacketBuffer::new();
                        match socket_copy.recv_from(&mut res_buffer.buf) {
                            Ok(_) => {}
                            Err(_) => {
                                continue;
                            }
                        }

                        // A response with a readable header but a damaged body
                        // still resolves its pending query; the records that
                        // did decode are all the caller will get. Only a
                        // packet without a header is skipped outright.
                        let packet = match DnsPacket::from_buffer_lenient(&mut res_buffer) {
                            Ok((packet, failures)) => {
                                if let Some(section) = failures.first() {
                                    log::debug!(
                                        "response {} had a truncated {:?} section",
                                        packet.header.id,
                                        section
                                    );
                                }
                                packet
                            }
                            Err(err) => {
                                log::info!(
                                    "DnsNetworkClient failed to parse packet with error: {}",
                                    err
                                );
                                continue;
                            }
                        };

                        // Acquire a lock on the pending_queries list, and search for a
                        // matching PendingQuery to which to deliver the response.
                        if let Ok(mut pending_queries) = pending_queries_lock.lock() {
                            let mut matched_query = None;
                            for (i, pending_query) in pending_queries.iter().enumerate() {
                                if pending_query.id == packet.header.id {
                                    // Matching query found, send the response
                                    let _ = pending_query.tx.send(Some(packet.clone()));

                                    // Mark this index for removal from list
                                    matched_query = Some(i);

                                    break;
                                }
                            }

                            if let Some(idx) = matched_query {
                                pending_queries.remove(idx);
                            } else {
                                log::info!("Discarding response with unknown id: {}", packet.header.id);
                            }
                        }
                    }
                })?;
        }

        // Start the thread for timing out requests
        {
            let pending_queries_lock = self.pending_queries.clone();
            let timeout = self.timeout;

            Builder::new()
                .name("DnsNetworkClient-timeout-thread".into())
                .spawn(move || loop {
                    if let Ok(mut pending_queries) = pending_queries_lock.lock() {
                        let mut finished_queries = Vec::new();
                        for (i, pending_query) in pending_queries.iter().enumerate() {
                            if pending_query.sent_at.elapsed() >= timeout {
                                let _ = pending_query.tx.send(None);
                                finished_queries.push(i);
                            }
                        }

                        // Remove `PendingQuery` objects from the list, in reverse order
                        for idx in finished_queries.iter().rev() {
                            pending_queries.remove(*idx);
                        }
                    }

                    sleep(Duration::from_millis(50));
                })?;
        }

        Ok(())
    }

    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (&str, u16),
        recursive: bool,
    ) -> Result<DnsPacket> {
        self.send_udp_query(qname, qtype, server, recursive)
    }
}
