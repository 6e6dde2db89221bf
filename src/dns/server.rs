//! UDP server implementation for DNS

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{sleep, Builder};
use std::time::Duration;

use derive_more::{Display, Error, From};
use uuid::Uuid;

use crate::dns::buffer::{BytePacketBuffer, PacketBuffer, VectorPacketBuffer};
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType, ResultCode};
use crate::dns::resolve::ResolutionEngine;

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

/// How often the intake thread wakes up to check the shutdown flag.
const INTAKE_POLL_INTERVAL: Duration = Duration::from_millis(250);

macro_rules! return_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(res) => res,
            Err(_) => {
                log::info!($message);
                return;
            }
        }
    };
}

macro_rules! ignore_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(_) => {}
            Err(_) => {
                log::info!($message);
                return;
            }
        };
    };
}

/// Everything known about a single inbound request. Created when the
/// datagram is decoded, dropped after the response has been sent.
pub struct RequestContext {
    pub client_addr: SocketAddr,
    pub qname: String,
    pub qtype: QueryType,
    pub recursion_requested: bool,
    pub request_id: Uuid,
}

/// Decrements the in-flight counter when a request worker finishes, however
/// it finishes.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stops the server from the outside: intake halts promptly, requests
/// already being serviced run to completion.
pub struct ShutdownHandle {
    shutdown: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl ShutdownHandle {
    /// Signal the intake thread to stop, wait for it to release the socket,
    /// then block until the last in-flight request has sent its response.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        while !self.stopped.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10));
        }

        while self.in_flight.load(Ordering::SeqCst) > 0 {
            sleep(Duration::from_millis(10));
        }
    }
}

/// Build the response for a resolved query. The transaction id and question
/// are mirrored from the request; RD and RA both reflect the recursion mode
/// the server actually applied, so a client forced into recursion can see
/// that from the flags.
pub fn build_response(
    request: &DnsPacket,
    answers: &[DnsRecord],
    rcode: ResultCode,
    recursion_applied: bool,
) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = request.header.id;
    packet.header.response = true;
    packet.header.recursion_desired = recursion_applied;
    packet.header.recursion_available = recursion_applied;
    packet.header.rescode = rcode;

    if let Some(question) = request.questions.first() {
        packet.questions.push(question.clone());
    }

    packet.answers.extend_from_slice(answers);

    packet
}

/// The UDP server
///
/// Accepts DNS queries through UDP. Datagrams are read on a single intake
/// thread, and every valid request gets a worker thread of its own; a slow
/// upstream therefore delays only the request waiting on it.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    shutdown: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsUdpServer {
        DnsUdpServer {
            context,
            shutdown: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Service one request from start to finish: resolve, write the trace
    /// rows, send the response.
    fn process_request(
        socket: &UdpSocket,
        context: Arc<ServerContext>,
        request_ctx: &RequestContext,
        request: &DnsPacket,
    ) {
        let engine = ResolutionEngine::new(context.clone());
        let recursion_applied =
            request_ctx.recursion_requested || context.force_recursive;

        let outcome = match engine.resolve(
            &request_ctx.qname,
            request_ctx.qtype,
            request_ctx.recursion_requested,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!(
                    "resolution of {:?} {} failed: {}",
                    request_ctx.qtype,
                    request_ctx.qname,
                    e
                );

                let mut response =
                    build_response(request, &[], ResultCode::SERVFAIL, recursion_applied);
                Self::send_response(socket, request_ctx.client_addr, &mut response);
                return;
            }
        };

        // The trace is written before the response goes out, but a trace
        // failure never blocks the answer
        for event in &outcome.trace {
            if let Err(e) = context.trace_log.log_event(
                &request_ctx.qname,
                outcome.mode,
                event,
                &request_ctx.request_id,
                outcome.cache_hit,
            ) {
                log::warn!("failed to write trace row: {}", e);
            }
        }

        let mut response = build_response(
            request,
            &outcome.answers,
            outcome.rcode,
            recursion_applied,
        );

        Self::send_response(socket, request_ctx.client_addr, &mut response);
    }

    fn send_response(socket: &UdpSocket, dest: SocketAddr, response: &mut DnsPacket) {
        let mut res_buffer = VectorPacketBuffer::new();
        ignore_or_report!(
            response.write(&mut res_buffer, 512),
            "Failed to write response packet to buffer"
        );

        let len = res_buffer.pos();
        let data = return_or_report!(res_buffer.get_range(0, len), "Failed to get buffer data");
        ignore_or_report!(socket.send_to(data, dest), "Failed to send response packet");
    }

    /// Launch the server
    ///
    /// Binds the configured address and starts the intake thread, returning
    /// the bound address (relevant when port 0 was configured) and a handle
    /// for stopping the server. This method does not block.
    pub fn run_server(self) -> Result<(SocketAddr, ShutdownHandle)> {
        let socket = UdpSocket::bind((self.context.listen_addr, self.context.dns_port))?;
        socket.set_read_timeout(Some(INTAKE_POLL_INTERVAL))?;

        let local_addr = socket.local_addr()?;

        let handle = ShutdownHandle {
            shutdown: self.shutdown.clone(),
            stopped: self.stopped.clone(),
            in_flight: self.in_flight.clone(),
        };

        let context = self.context;
        let shutdown = self.shutdown;
        let stopped = self.stopped;
        let in_flight = self.in_flight;

        Builder::new()
            .name("DnsUdpServer-incoming".into())
            .spawn(move || {
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        stopped.store(true, Ordering::SeqCst);
                        return;
                    }

                    // Read a query packet
                    let mut req_buffer = BytePacketBuffer::new();
                    let (_, src) = match socket.recv_from(&mut req_buffer.buf) {
                        Ok(x) => x,
                        Err(ref e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::info!("Failed to read from UDP socket: {:?}", e);
                            continue;
                        }
                    };

                    // Parse it; a datagram that is not a well-formed query
                    // gets no response at all
                    let request = match DnsPacket::from_buffer(&mut req_buffer) {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to parse UDP query packet: {:?}", e);
                            continue;
                        }
                    };

                    let question = match request.questions.first() {
                        Some(q) => q.clone(),
                        None => {
                            log::info!("Dropping query without a question from {}", src);
                            continue;
                        }
                    };

                    let request_ctx = RequestContext {
                        client_addr: src,
                        qname: question.name.clone(),
                        qtype: question.qtype,
                        recursion_requested: request.header.recursion_desired,
                        request_id: Uuid::new_v4(),
                    };

                    let seq = context
                        .statistics
                        .udp_query_count
                        .fetch_add(1, Ordering::Release);

                    let worker_socket = match socket.try_clone() {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to clone socket for request worker: {:?}", e);
                            continue;
                        }
                    };

                    // Count the request before the worker exists, so a
                    // shutdown can never slip between spawn and guard
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    let guard = InFlightGuard(in_flight.clone());

                    let worker_context = context.clone();
                    let spawn_result = Builder::new()
                        .name(format!("DnsUdpServer-request-{}", seq))
                        .spawn(move || {
                            let _guard = guard;
                            Self::process_request(
                                &worker_socket,
                                worker_context,
                                &request_ctx,
                                &request,
                            );
                        });

                    if let Err(e) = spawn_result {
                        log::info!("Failed to spawn request worker: {:?}", e);
                    }
                }
            })?;

        Ok((local_addr, handle))
    }
}
