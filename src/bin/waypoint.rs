use std::env;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;

use waypoint::dns::client::DnsNetworkClient;
use waypoint::dns::cache::SynchronizedCache;
use waypoint::dns::context::ServerContext;
use waypoint::dns::server::DnsUdpServer;
use waypoint::dns::trace::TraceLogger;

const DEFAULT_TRACE_LOG: &str = "logs/resolver_trace.csv";

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("l", "listen", "Bind address (default 0.0.0.0)", "IP");
    opts.optopt("p", "port", "UDP port to listen on (default 53)", "PORT");
    opts.optopt(
        "t",
        "timeout",
        "Per-query upstream timeout in seconds (default 3.0)",
        "SECONDS",
    );
    opts.optopt(
        "L",
        "log",
        &format!("Trace log path (default {})", DEFAULT_TRACE_LOG),
        "PATH",
    );
    opts.optflag(
        "r",
        "recursive",
        "Resolve recursively even when clients do not ask for it",
    );
    opts.optflag("", "no-cache", "Disable the answer cache");
    opts.optmulti(
        "",
        "root-server",
        "Replace the built-in root server list (repeatable)",
        "IP",
    );
    opts.optmulti(
        "",
        "upstream",
        "Upstream resolver for recursive delegation (repeatable; \
         defaults to the system resolvers)",
        "IP",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            std::process::exit(1);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let trace_log_path = opt_matches
        .opt_str("L")
        .unwrap_or_else(|| DEFAULT_TRACE_LOG.to_string());

    let trace_log = match TraceLogger::open(&trace_log_path) {
        Ok(logger) => logger,
        Err(e) => {
            log::error!("Failed to open trace log {}: {}", trace_log_path, e);
            std::process::exit(1);
        }
    };

    let mut context = ServerContext::new(trace_log)
        .expect("Failed to initialize server context");

    if let Some(listen) = opt_matches.opt_str("l") {
        match listen.parse::<Ipv4Addr>() {
            Ok(addr) => context.listen_addr = addr,
            Err(_) => {
                log::error!("Listen address {} is not a valid IPv4 address", listen);
                std::process::exit(1);
            }
        }
    }

    if let Some(port) = opt_matches.opt_str("p") {
        match port.parse::<u16>() {
            Ok(port) => context.dns_port = port,
            Err(_) => {
                log::error!("{} is not a valid port", port);
                std::process::exit(1);
            }
        }
    }

    if let Some(timeout) = opt_matches.opt_str("t") {
        match timeout.parse::<f64>() {
            Ok(secs) if secs > 0.0 => {
                context.timeout = Duration::from_secs_f64(secs);
                // The timeout lives in the client's sweeper thread, so a
                // non-default value needs a fresh client
                match DnsNetworkClient::new(0, context.timeout) {
                    Ok(client) => context.client = Box::new(client),
                    Err(e) => {
                        log::error!("Failed to set up upstream client: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            _ => {
                log::error!("{} is not a valid timeout", timeout);
                std::process::exit(1);
            }
        }
    }

    if opt_matches.opt_present("recursive") {
        context.force_recursive = true;
    }

    if opt_matches.opt_present("no-cache") {
        context.cache = SynchronizedCache::disabled();
        log::info!("Answer cache disabled");
    }

    let root_overrides = opt_matches.opt_strs("root-server");
    if !root_overrides.is_empty() {
        match root_overrides
            .iter()
            .map(|s| s.parse::<Ipv4Addr>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(servers) => context.root_servers = servers,
            Err(_) => {
                log::error!("Root server overrides must be IPv4 addresses");
                std::process::exit(1);
            }
        }
    }

    let upstream_overrides = opt_matches.opt_strs("upstream");
    if !upstream_overrides.is_empty() {
        match upstream_overrides
            .iter()
            .map(|s| s.parse::<Ipv4Addr>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(upstreams) => context.upstreams = upstreams,
            Err(_) => {
                log::error!("Upstream overrides must be IPv4 addresses");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = context.initialize() {
        log::error!("Server failed to initialize: {}", e);
        std::process::exit(1);
    }

    log::info!(
        "upstream resolvers: {}",
        context
            .upstreams
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    log::info!("trace log: {}", trace_log_path);

    let context = Arc::new(context);

    let server = DnsUdpServer::new(context);
    match server.run_server() {
        Ok((addr, _handle)) => {
            log::info!("Listening on {}", addr);
        }
        Err(e) => {
            log::error!("Failed to bind UDP listener: {}", e);
            std::process::exit(1);
        }
    }

    loop {
        std::thread::park();
    }
}
