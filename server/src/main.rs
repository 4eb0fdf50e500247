use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::game;
use server::network::NetworkServer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    /// Seconds a new connection may take to send its handshake
    #[arg(long, default_value_t = 10)]
    handshake_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        update_rate: args.tick_rate,
        handshake_timeout: std::time::Duration::from_secs(args.handshake_timeout),
        ..ServerConfig::default()
    };

    info!("Starting pirate server on {}", config.address());
    let sessions = game::session_manager(&config);
    let mut server = NetworkServer::bind(config, sessions).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
