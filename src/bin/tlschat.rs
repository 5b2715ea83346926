//! tlschat - terminal client for the chat relay.
//!
//! Usage: `tlschat <server_address> <port>`

use clap::error::ErrorKind;
use clap::Parser as ClapParser;
use tlschat::client::{self, ChatClient, SessionEnd};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chat over TLS with everyone connected to a tlschat server.
#[derive(ClapParser, Debug)]
#[command(name = "tlschat", version, about, long_about = None)]
struct Cli {
    /// Server IP address or hostname
    server_address: String,

    /// Server TCP port
    port: String,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    init_tracing();

    let port = match client::parse_port(&cli.port) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let chat = match ChatClient::connect(&cli.server_address, port).await {
        Ok(chat) => chat,
        Err(e) => {
            eprintln!("tlschat: {e}");
            eprintln!("Could not connect to the server. Exiting.");
            std::process::exit(1);
        }
    };
    println!("{}", client::CONNECTED_NOTICE);

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let code = match chat.run(input, tokio::io::stdout()).await {
        Ok(SessionEnd::ServerClosed) | Ok(SessionEnd::InputClosed) => 0,
        Err(e) => {
            tracing::debug!(error = %e, "session ended with error");
            eprintln!("tlschat: {e}");
            1
        }
    };
    // The blocking stdin reader may still be parked; exit instead of returning.
    std::process::exit(code);
}

/// Logs go to stderr so they never interleave with the chat on stdout.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tlschat=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
