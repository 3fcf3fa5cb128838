//! STOMP broker binary.
//!
//! # Usage
//!
//! ```bash
//! # Thread-per-client on the default port
//! stomp-server
//!
//! # Reactor on port 7777 with four workers
//! stomp-server 7777 reactor --reactor-threads 4
//! ```

use clap::Parser;
use stomp_server::{BrokerConfig, DEFAULT_PORT, DEFAULT_SERVER_ID, ServerConfig, TransportMode};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// STOMP publish/subscribe broker
#[derive(Parser, Debug)]
#[command(name = "stomp-server")]
#[command(about = "Publish/subscribe broker for the STOMP text protocol")]
#[command(version)]
struct Args {
    /// TCP port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connection scheduling strategy
    #[arg(value_enum, ignore_case = true, default_value_t = TransportMode::Tpc)]
    mode: TransportMode,

    /// Interface to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Host clients must present in CONNECT
    #[arg(long, default_value = DEFAULT_SERVER_ID)]
    server_id: String,

    /// Largest accepted frame in bytes
    #[arg(long, default_value_t = stomp_proto::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Reactor worker threads (defaults to available parallelism)
    #[arg(long)]
    reactor_threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        bind_host: args.bind,
        port: args.port,
        mode: args.mode,
        max_frame_size: args.max_frame_size,
        reactor_threads: args.reactor_threads,
        broker: BrokerConfig { server_id: args.server_id, ..Default::default() },
    };

    stomp_server::run(config)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn mode_is_case_insensitive() {
        let args = Args::try_parse_from(["stomp-server", "7790", "TPC"]).unwrap();
        assert_eq!(args.port, 7790);
        assert_eq!(args.mode, TransportMode::Tpc);

        let args = Args::try_parse_from(["stomp-server", "7790", "Reactor"]).unwrap();
        assert_eq!(args.mode, TransportMode::Reactor);
    }

    #[test]
    fn defaults_and_invalid_mode() {
        let args = Args::try_parse_from(["stomp-server"]).unwrap();
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.mode, TransportMode::Tpc);
        assert_eq!(args.server_id, DEFAULT_SERVER_ID);

        assert!(Args::try_parse_from(["stomp-server", "7777", "threads"]).is_err());
    }
}
