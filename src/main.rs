//! Entry point for the `minitcp` demo.
//!
//! Runs an echo server: every connection accepted on the listen port has its
//! data sent straight back.  All protocol work is delegated to library
//! modules; this file owns only process setup (logging, argument parsing,
//! the runtime).

use std::net::SocketAddrV4;

use anyhow::Result;
use clap::Parser;

use minitcp::{Listener, UdpNet};

/// TCP-like reliable transport demo: an echo server on an unreliable
/// UDP-backed datagram layer.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address for the datagram layer (e.g. 0.0.0.0:9000).  The UDP
    /// port doubles as the transport listen port.
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: SocketAddrV4,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    // The transport is single-threaded: everything runs on one LocalSet.
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let net = UdpNet::bind(cli.bind).await?;
            let listener = Listener::bind(net, cli.bind.port());
            log::info!("echo server listening on {}", cli.bind);

            listener.register_accept_callback(|conn| {
                log::info!("accepted {}", conn.key());
                conn.register_data_callback(|conn, data| {
                    // Empty deliveries are bare ACKs or the peer's
                    // end-of-stream; either way there is nothing to echo.
                    if !data.is_empty() {
                        conn.send(data);
                    }
                });
            });

            std::future::pending::<()>().await;
            Ok(())
        })
        .await
}
