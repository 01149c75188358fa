use crate::camera::Camera;
use crate::game::WorldSnapshot;
use crate::sprites::{FrameDecoder, SpriteResolver};
use macroquad::prelude::*;
use shared::{clamp_to_world, Player};

pub const LABEL_OFFSET_Y: f32 = 5.0;
pub const MARKER_GAP: f32 = 8.0;
pub const MARKER_RISE: f32 = 4.0;
pub const MARKER_RADIUS: f32 = 3.0;

const BACKGROUND_COLOR: Color = Color::new(0.1, 0.1, 0.1, 1.0);
const LOCAL_LABEL_COLOR: Color = Color::new(1.0, 0.843, 0.0, 1.0);
const MOVING_MARKER_COLOR: Color = Color::new(0.0, 1.0, 0.0, 1.0);
const OVERLAY_COLOR: Color = Color::new(0.0, 0.0, 0.0, 0.6);

/// Coalesces redraw requests so at most one frame is drawn per refresh.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: bool,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any frame still waiting for the next refresh.
    pub fn request_redraw(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Called on refresh. Returns true if a frame should be drawn now.
    pub fn take_frame(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn cancel(&mut self) {
        self.pending = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStyle {
    Local,
    Remote,
}

impl LabelStyle {
    pub fn font_size(self) -> f32 {
        match self {
            LabelStyle::Local => 14.0,
            LabelStyle::Remote => 12.0,
        }
    }
}

/// Drawing target for one frame. Coordinates are screen pixels.
pub trait Surface {
    type Sprite;

    fn viewport(&self) -> (f32, f32);
    fn clear(&mut self);
    fn draw_background(&mut self, x: f32, y: f32);
    /// `x`, `y` is the top-left of the sprite's screen rectangle. A mirrored
    /// sprite is flipped about its own vertical center line, so it occupies
    /// the same rectangle as the unmirrored one.
    fn draw_sprite(&mut self, sprite: &Self::Sprite, x: f32, y: f32, flip_x: bool);
    fn measure_label(&self, text: &str, style: LabelStyle) -> f32;
    /// Draws `text` horizontally centered on `center_x`.
    fn draw_label(&mut self, text: &str, center_x: f32, baseline_y: f32, style: LabelStyle);
    fn draw_moving_marker(&mut self, x: f32, y: f32);
    fn draw_connecting_overlay(&mut self);
}

/// True when any part of a `width` x `height` sprite at `(x, y)` can be on screen.
pub fn is_on_screen(x: f32, y: f32, width: f32, height: f32, viewport: (f32, f32)) -> bool {
    let (viewport_width, viewport_height) = viewport;
    !(x < -width || x > viewport_width || y < -height || y > viewport_height)
}

/// Converts a pointer position to the world position it points at.
pub fn pointer_to_world(pointer: (f32, f32), camera: &Camera) -> (f32, f32) {
    (
        clamp_to_world(pointer.0 + camera.x),
        clamp_to_world(pointer.1 + camera.y),
    )
}

/// Draws one frame of `snapshot`. Returns how many entities were drawn.
///
/// Entities whose frames are not decoded yet are skipped for this frame.
pub fn render_frame<D, S>(snapshot: &WorldSnapshot, sprites: &SpriteResolver<D>, surface: &mut S) -> usize
where
    D: FrameDecoder,
    S: Surface<Sprite = D::Sprite>,
{
    let camera = snapshot.camera;
    surface.clear();
    surface.draw_background(-camera.x, -camera.y);

    // Painter's order: lower on screen draws later. Id breaks ties so the
    // order is stable between frames.
    let mut players: Vec<&Player> = snapshot.players.values().collect();
    players.sort_by(|a, b| a.y.total_cmp(&b.y).then_with(|| a.id.cmp(&b.id)));

    let viewport = surface.viewport();
    let mut drawn = 0;
    for player in players {
        if !snapshot.avatars.contains_key(&player.avatar) {
            continue;
        }
        let Some(sprite) = sprites.resolve(&player.avatar, player.facing, player.animation_frame as usize) else {
            continue;
        };

        let (world_x, world_y) = player.clamped_position();
        let (screen_x, screen_y) = camera.world_to_screen(world_x, world_y);
        if !is_on_screen(screen_x, screen_y, sprite.width, sprite.height, viewport) {
            continue;
        }

        surface.draw_sprite(sprite.sprite, screen_x, screen_y, sprite.flip_x);
        draw_name_label(surface, snapshot, player, screen_x, screen_y, sprite.width);
        drawn += 1;
    }

    if !snapshot.connected {
        surface.draw_connecting_overlay();
    }

    drawn
}

fn draw_name_label<S: Surface>(
    surface: &mut S,
    snapshot: &WorldSnapshot,
    player: &Player,
    screen_x: f32,
    screen_y: f32,
    sprite_width: f32,
) {
    let is_local = snapshot.is_local(&player.id);
    let style = if is_local {
        LabelStyle::Local
    } else {
        LabelStyle::Remote
    };

    let text_x = screen_x + sprite_width / 2.0;
    let text_y = screen_y - LABEL_OFFSET_Y;
    surface.draw_label(&player.username, text_x, text_y, style);

    if player.is_moving && !is_local {
        let text_width = surface.measure_label(&player.username, style);
        surface.draw_moving_marker(text_x + text_width / 2.0 + MARKER_GAP, text_y - MARKER_RISE);
    }
}

/// Immediate-mode macroquad drawing into whatever camera is active.
pub struct MacroquadSurface<'a> {
    background: Option<&'a Texture2D>,
    width: f32,
    height: f32,
}

impl<'a> MacroquadSurface<'a> {
    pub fn new(background: Option<&'a Texture2D>, width: f32, height: f32) -> Self {
        Self {
            background,
            width,
            height,
        }
    }
}

impl Surface for MacroquadSurface<'_> {
    type Sprite = Texture2D;

    fn viewport(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        clear_background(BACKGROUND_COLOR);
    }

    fn draw_background(&mut self, x: f32, y: f32) {
        if let Some(background) = self.background {
            draw_texture(background, x, y, WHITE);
        }
    }

    fn draw_sprite(&mut self, sprite: &Texture2D, x: f32, y: f32, flip_x: bool) {
        draw_texture_ex(
            sprite,
            x,
            y,
            WHITE,
            DrawTextureParams {
                flip_x,
                ..Default::default()
            },
        );
    }

    fn measure_label(&self, text: &str, style: LabelStyle) -> f32 {
        measure_text(text, None, style.font_size() as u16, 1.0).width
    }

    fn draw_label(&mut self, text: &str, center_x: f32, baseline_y: f32, style: LabelStyle) {
        let size = style.font_size();
        let x = center_x - self.measure_label(text, style) / 2.0;
        let color = match style {
            LabelStyle::Local => LOCAL_LABEL_COLOR,
            LabelStyle::Remote => WHITE,
        };

        draw_text(text, x + 1.0, baseline_y + 1.0, size, BLACK);
        draw_text(text, x, baseline_y, size, color);
        if style == LabelStyle::Local {
            // Faux bold.
            draw_text(text, x + 0.5, baseline_y, size, color);
        }
    }

    fn draw_moving_marker(&mut self, x: f32, y: f32) {
        draw_circle(x, y, MARKER_RADIUS, MOVING_MARKER_COLOR);
    }

    fn draw_connecting_overlay(&mut self) {
        draw_rectangle(0.0, 0.0, self.width, self.height, OVERLAY_COLOR);

        let text = "Connecting...";
        let size = 32.0;
        let dimensions = measure_text(text, None, size as u16, 1.0);
        draw_text(
            text,
            (self.width - dimensions.width) / 2.0,
            self.height / 2.0,
            size,
            WHITE,
        );
    }
}

/// Keeps the last rendered frame in an off-screen target so refreshes
/// without a pending redraw can re-show it.
pub struct Presenter {
    target: RenderTarget,
    width: u32,
    height: u32,
}

impl Presenter {
    pub fn new(width: f32, height: f32) -> Self {
        let (width, height) = (width.max(1.0) as u32, height.max(1.0) as u32);
        Self {
            target: Self::create_target(width, height),
            width,
            height,
        }
    }

    fn create_target(width: u32, height: u32) -> RenderTarget {
        let target = render_target(width, height);
        target.texture.set_filter(FilterMode::Nearest);
        target
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width as f32, self.height as f32)
    }

    /// Recreates the target when the window size changed. Returns true if it did.
    pub fn resize(&mut self, width: f32, height: f32) -> bool {
        let (width, height) = (width.max(1.0) as u32, height.max(1.0) as u32);
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.target = Self::create_target(width, height);
        self.width = width;
        self.height = height;
        true
    }

    /// Runs `draw` with the off-screen target as the drawing destination.
    pub fn draw_offscreen<F: FnOnce()>(&self, draw: F) {
        let (width, height) = self.size();
        // Render targets are sampled bottom-up, so the y axis is not inverted here.
        set_camera(&Camera2D {
            target: vec2(width / 2.0, height / 2.0),
            zoom: vec2(2.0 / width, 2.0 / height),
            render_target: Some(self.target.clone()),
            ..Default::default()
        });
        draw();
        set_default_camera();
    }

    pub fn present(&self) {
        clear_background(BLACK);
        draw_texture_ex(
            &self.target.texture,
            0.0,
            0.0,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(screen_width(), screen_height())),
                ..Default::default()
            },
        );
    }
}
