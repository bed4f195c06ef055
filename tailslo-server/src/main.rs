use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tailslo_server::config::{DEFAULT_CHUNKS, DEFAULT_PORT};
use tailslo_server::{Server, StubConfig};

#[derive(Parser, Debug)]
#[command(name = "tailslo-stub", about = "Stub token-streaming generation service")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    address: SocketAddr,

    /// Content frames per response.
    #[arg(long, default_value_t = DEFAULT_CHUNKS)]
    chunks: usize,

    /// Milliseconds before the first content frame.
    #[arg(long, default_value_t = 50)]
    first_token_ms: u64,

    /// Milliseconds between content frames.
    #[arg(long, default_value_t = 10)]
    inter_chunk_ms: u64,

    /// Close streams without the `data: [DONE]` sentinel.
    #[arg(long)]
    no_done: bool,

    /// Fail every generation request with this HTTP status.
    #[arg(long)]
    error_status: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = StubConfig {
        address: args.address,
        first_token_delay: Duration::from_millis(args.first_token_ms),
        inter_chunk_delay: Duration::from_millis(args.inter_chunk_ms),
        chunks: args.chunks,
        send_done: !args.no_done,
        error_status: args.error_status,
        hold_open: false,
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Print "Listening on <addr>" once the server signals it is bound.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            println!("Listening on {}", addr);
        }
    });

    Server::new(config).run(ready_tx).await?;
    Ok(())
}
