//! # Sprite World Client Library
//!
//! This library provides the client side of a shared 2D sprite world. The server
//! owns every position; the client mirrors what the server reports, draws it
//! from the local player's point of view, and forwards the player's intents.
//!
//! ## Architecture Overview
//!
//! Everything that touches client state runs on the main thread, once per
//! display refresh. Work that would block that thread runs elsewhere and
//! reports back over channels:
//!
//! ### Transport
//! Each WebSocket connection attempt runs as a task on a tokio runtime. Its
//! events are tagged with a generation number so events from a transport the
//! client already abandoned are ignored.
//!
//! ### Sprite Decoding
//! Avatar frames arrive as base64 data URLs. Each avatar is decoded as one
//! batch on the blocking pool and uploaded to the GPU when the whole batch is
//! done.
//!
//! ### State Mirroring
//! Transport events are drained into the [`game::WorldStore`] on the main
//! thread. The store publishes a fresh [`game::WorldSnapshot`] after every
//! change, and the render loop draws the newest one.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Connection lifecycle and automatic reconnect
//! - Join handshake and identity changes
//! - Outbound movement intents
//!
//! ### Game Module (`game`)
//! - Player roster and avatar definitions
//! - Camera recentering on the local player
//! - Snapshot publication
//!
//! ### Camera Module (`camera`)
//! Viewport offset clamped to the world bounds.
//!
//! ### Sprites Module (`sprites`)
//! Decoding, caching, and lookup of animation frames, including mirrored
//! west-facing frames.
//!
//! ### Rendering Module (`rendering`)
//! Frame scheduling, culling, name labels, and click-to-world conversion.
//!
//! ### Input Module (`input`)
//! Held-key tracking with a fixed-rate repeat.
//!
//! ### Preferences Module (`preferences`)
//! Username and panel visibility persisted between runs.
//!
//! ### App Module (`app`)
//! Wires the components together and runs the per-refresh loop.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::app::{self, GameClient};
//! use client::input::InputTranslator;
//! use client::network::{ConnectionConfig, ConnectionManager, WsConnector};
//! use client::preferences::PreferenceStore;
//! use client::sprites::{SpriteResolver, TextureDecoder};
//!
//! # async fn start(runtime: tokio::runtime::Handle) {
//! let connection = ConnectionManager::new(
//!     ConnectionConfig::default(),
//!     WsConnector::new(runtime.clone()),
//!     PreferenceStore::load("mmo-client.json"),
//! );
//! let sprites = SpriteResolver::new(TextureDecoder, runtime);
//! let client = GameClient::new(connection, sprites, InputTranslator::default(), (1280.0, 720.0));
//!
//! app::run(client, None).await;
//! # }
//! ```

pub mod app;
pub mod camera;
pub mod game;
pub mod input;
pub mod network;
pub mod preferences;
pub mod rendering;
pub mod sprites;
