use clap::Parser;
use client::config::ClientConfig;
use client::network::RemoteSceneClient;
use client::rendering::TraceSurface;
use log::info;
use rand::Rng;
use shared::SceneEvent;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Player name sent in the handshake
    #[arg(short = 'n', long, default_value = "Calico Jack")]
    name: String,

    /// Screen width
    #[arg(short = 'w', long, default_value = "1280")]
    width: u32,

    /// Screen height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "720")]
    height: u32,

    /// Local frame rate
    #[arg(short = 'r', long, default_value = "60")]
    frame_rate: u32,

    /// Stop after this many seconds (0 runs until the server disconnects)
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        host: args.host,
        port: args.port,
        resolution: (args.width, args.height),
        ..ClientConfig::default()
    }
    .with_name(args.name);

    info!("Connecting to {}", config.url());
    let mut client = RemoteSceneClient::new(config);
    client.connect().await?;
    if let Some(scene) = client.scene() {
        info!("Session {} sees {} entities", scene.session_id(), scene.len());
    }

    let frame = Duration::from_nanos(1_000_000_000 / u64::from(args.frame_rate.max(1)));
    let deadline = (args.duration > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(args.duration));
    let mut interval = tokio::time::interval(frame);
    let mut surface = TraceSurface::new();
    let mut rng = rand::thread_rng();
    let (width, height) = (args.width.max(1) as f32, args.height.max(1) as f32);

    while client.is_connected() {
        interval.tick().await;
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            break;
        }

        // Wander the pointer and fire now and then
        let pos = (rng.gen_range(0.0..width), rng.gen_range(0.0..height));
        client.push_event(SceneEvent::MouseMove { pos, rel: (0.0, 0.0), buttons: Vec::new() });
        if rng.gen_bool(0.05) {
            client.push_event(SceneEvent::MouseDown { pos, button: 1 });
        }

        client.update().await?;
        surface.begin_frame();
        client.draw(&mut surface);

        if surface.frames() % 300 == 0 {
            if let Some(scene) = client.scene() {
                info!(
                    "Frame {}: {} entities, {} primitives drawn",
                    surface.frames(),
                    scene.len(),
                    surface.primitives()
                );
            }
        }
    }

    client.close().await;
    info!("Client stopped after {} frames", surface.frames());
    Ok(())
}
