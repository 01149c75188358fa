//! Sprite frame decoding and caching
//!
//! Avatars arrive as base64 data URLs. Each newly seen avatar is decoded as
//! one batch on the runtime's blocking pool; the finished batch comes back
//! over a channel and is uploaded on the main thread by [`SpriteResolver::poll`].
//! Until then lookups for that avatar report "not ready" and the renderer
//! skips the entity. Cached frames are never evicted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, error};
use macroquad::prelude::{FilterMode, Image, Texture2D};
use shared::{Avatar, Facing};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("frame source is not a base64 data URL")]
    NotDataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Image(String),
}

/// Cache key. `direction` is always canonical: west frames live under east.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpriteKey {
    pub avatar: String,
    pub direction: Facing,
    pub frame: usize,
}

impl SpriteKey {
    /// Key for a logical facing, plus whether the frame must be mirrored.
    pub fn resolve(avatar: &str, facing: Facing, frame: usize) -> (Self, bool) {
        let (direction, flip_x) = facing.canonical();
        let key = Self {
            avatar: avatar.to_string(),
            direction,
            frame,
        };
        (key, flip_x)
    }
}

/// Turns frame sources into drawable sprites.
///
/// `decode` runs off the main thread; `upload` runs on it.
pub trait FrameDecoder: Send + Sync + 'static {
    type Decoded: Send + 'static;
    type Sprite;

    fn decode(&self, source: &str) -> Result<Self::Decoded, SpriteError>;
    fn upload(&self, decoded: Self::Decoded) -> Self::Sprite;
    fn size(&self, sprite: &Self::Sprite) -> (f32, f32);
}

/// Extracts the raw bytes of a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(source: &str) -> Result<Vec<u8>, SpriteError> {
    let rest = source.strip_prefix("data:").ok_or(SpriteError::NotDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(SpriteError::NotDataUrl)?;
    if !meta.ends_with(";base64") {
        return Err(SpriteError::NotDataUrl);
    }
    Ok(STANDARD.decode(payload.trim())?)
}

/// Decodes frames into macroquad textures with pixel-art filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureDecoder;

impl FrameDecoder for TextureDecoder {
    type Decoded = Image;
    type Sprite = Texture2D;

    fn decode(&self, source: &str) -> Result<Image, SpriteError> {
        let bytes = decode_data_url(source)?;
        Image::from_file_with_format(&bytes, None).map_err(|e| SpriteError::Image(format!("{:?}", e)))
    }

    fn upload(&self, image: Image) -> Texture2D {
        let texture = Texture2D::from_image(&image);
        texture.set_filter(FilterMode::Nearest);
        texture
    }

    fn size(&self, texture: &Texture2D) -> (f32, f32) {
        (texture.width(), texture.height())
    }
}

struct DecodedBatch<T> {
    avatar: String,
    frames: Vec<(SpriteKey, Result<T, SpriteError>)>,
}

/// A cached frame ready to draw.
#[derive(Debug)]
pub struct ResolvedSprite<'a, S> {
    pub key: SpriteKey,
    pub sprite: &'a S,
    pub flip_x: bool,
    pub width: f32,
    pub height: f32,
}

pub struct SpriteResolver<D: FrameDecoder> {
    decoder: Arc<D>,
    runtime: Handle,
    cache: HashMap<SpriteKey, D::Sprite>,
    requested: HashSet<String>,
    completed_tx: mpsc::UnboundedSender<DecodedBatch<D::Decoded>>,
    completed_rx: mpsc::UnboundedReceiver<DecodedBatch<D::Decoded>>,
}

impl<D: FrameDecoder> SpriteResolver<D> {
    pub fn new(decoder: D, runtime: Handle) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            decoder: Arc::new(decoder),
            runtime,
            cache: HashMap::new(),
            requested: HashSet::new(),
            completed_tx,
            completed_rx,
        }
    }

    /// Schedules decoding for every avatar not seen before. Returns how many
    /// batches were started.
    pub fn observe<'a, I>(&mut self, avatars: I) -> usize
    where
        I: IntoIterator<Item = (&'a String, &'a Arc<Avatar>)>,
    {
        let mut started = 0;
        for (name, avatar) in avatars {
            if !self.requested.insert(name.clone()) {
                continue;
            }
            started += 1;

            let name = name.clone();
            let avatar = Arc::clone(avatar);
            let decoder = Arc::clone(&self.decoder);
            let completed = self.completed_tx.clone();
            self.runtime.spawn_blocking(move || {
                let frames = avatar
                    .frames
                    .iter()
                    .map(|(direction, frame, source)| {
                        let key = SpriteKey {
                            avatar: name.clone(),
                            direction,
                            frame,
                        };
                        (key, decoder.decode(source))
                    })
                    .collect();
                let _ = completed.send(DecodedBatch {
                    avatar: name,
                    frames,
                });
            });
        }
        started
    }

    /// Uploads finished batches. Returns true when new frames became drawable.
    pub fn poll(&mut self) -> bool {
        let mut inserted = false;
        while let Ok(batch) = self.completed_rx.try_recv() {
            let total = batch.frames.len();
            let mut failed = 0;
            for (key, result) in batch.frames {
                match result {
                    Ok(decoded) => {
                        let sprite = self.decoder.upload(decoded);
                        self.cache.insert(key, sprite);
                        inserted = true;
                    }
                    Err(e) => {
                        failed += 1;
                        error!(
                            "Failed to load avatar frame {} {:?} #{}: {}",
                            key.avatar, key.direction, key.frame, e
                        );
                    }
                }
            }
            debug!(
                "Avatar {} decoded: {} frames, {} failed",
                batch.avatar, total, failed
            );
        }
        inserted
    }

    /// Looks up the frame for a logical facing. `None` means not decoded
    /// (yet, or ever).
    pub fn resolve(&self, avatar: &str, facing: Facing, frame: usize) -> Option<ResolvedSprite<'_, D::Sprite>> {
        let (key, flip_x) = SpriteKey::resolve(avatar, facing, frame);
        let sprite = self.cache.get(&key)?;
        let (width, height) = self.decoder.size(sprite);
        Some(ResolvedSprite {
            key,
            sprite,
            flip_x,
            width,
            height,
        })
    }

    pub fn is_ready(&self, key: &SpriteKey) -> bool {
        self.cache.contains_key(key)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
