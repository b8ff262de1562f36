use anyhow::Result;
use clap::Parser;
use socksd::{
    ServerConfig, Socks5Server,
    auth::methods_for_credentials,
    config::{DEFAULT_DIAL_TIMEOUT, DEFAULT_PORT},
};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username (authentication is enabled when both user and pass are set)
    #[arg(long, default_value = "")]
    user: String,

    /// Password
    #[arg(long, default_value = "")]
    pass: String,

    /// Outbound connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_DIAL_TIMEOUT.as_secs())]
    dial_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let methods = methods_for_credentials(&args.user, &args.pass);
    if args.user.is_empty() || args.pass.is_empty() {
        info!("Authentication disabled");
    } else {
        info!("Username/password authentication enabled");
    }

    let config = ServerConfig::new(format!("0.0.0.0:{}", args.port))
        .with_auth_methods(methods)
        .with_dial_timeout(Duration::from_secs(args.dial_timeout));

    // Instantiate server
    let mut server = Socks5Server::new(config).with_span(tracing::info_span!("socksd"));

    // Run it
    info!("Starting SOCKS5 proxy on {}", server.config().listen_addr);
    server.run().await
}
