use clap::Parser;
use client::app::{self, GameClient};
use client::input::InputTranslator;
use client::network::{ConnectionConfig, ConnectionManager, WsConnector, DEFAULT_SERVER_URL};
use client::preferences::PreferenceStore;
use client::sprites::{SpriteResolver, TextureDecoder};
use log::{error, info, warn};
use macroquad::prelude::*;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the game server
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Display name to use (remembered for next time)
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Window width
    #[arg(short = 'w', long, default_value = "1280")]
    width: u32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "720")]
    height: u32,

    /// Background image covering the whole world
    #[arg(long, default_value = "assets/world.jpg")]
    world_image: String,

    /// Where the username and panel settings are stored
    #[arg(long, default_value = "mmo-client.json")]
    prefs: String,

    /// Delay before reconnecting after the connection drops
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Give up on a connection attempt that has not opened after this long
    #[arg(long, default_value = "10000")]
    connect_timeout_ms: u64,

    /// Interval between repeated move intents while a key is held
    #[arg(long, default_value = "50")]
    move_repeat_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;

    let mut preferences = PreferenceStore::load(&args.prefs);
    if let Some(username) = &args.username {
        if let Err(e) = preferences.set_username(username) {
            warn!("Could not save username: {}", e);
        }
    }

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Controls: arrows/WASD to move, click to walk to a spot");

    let config = ConnectionConfig {
        url: args.server.clone(),
        reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
    };
    let connection = ConnectionManager::new(config, WsConnector::new(runtime.handle().clone()), preferences);
    let sprites = SpriteResolver::new(TextureDecoder, runtime.handle().clone());
    let input = InputTranslator::new(Duration::from_millis(args.move_repeat_ms));

    let conf = Conf {
        window_title: "Sprite World".to_string(),
        window_width: args.width as i32,
        window_height: args.height as i32,
        window_resizable: true,
        ..Default::default()
    };
    let viewport = (args.width as f32, args.height as f32);
    let world_image = args.world_image;

    macroquad::Window::from_config(conf, async move {
        let background = match load_texture(&world_image).await {
            Ok(texture) => Some(texture),
            Err(e) => {
                error!("Failed to load world image {}: {:?}", world_image, e);
                None
            }
        };

        let client = GameClient::new(connection, sprites, input, viewport);
        app::run(client, background).await;
    });

    info!("Client stopped");
    Ok(())
}
