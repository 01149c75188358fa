//! Camera offset derived from the local player's position

use shared::WORLD_SIZE;

/// Top-left corner of the viewport in world units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
}

impl Camera {
    /// Centers the viewport on the player, clamped so it never leaves the world.
    pub fn follow(player_x: f32, player_y: f32, viewport_width: f32, viewport_height: f32) -> Self {
        Self::follow_in(player_x, player_y, viewport_width, viewport_height, WORLD_SIZE)
    }

    pub fn follow_in(
        player_x: f32,
        player_y: f32,
        viewport_width: f32,
        viewport_height: f32,
        world_size: f32,
    ) -> Self {
        Self {
            x: axis_offset(player_x, viewport_width, world_size),
            y: axis_offset(player_y, viewport_height, world_size),
        }
    }

    pub fn world_to_screen(&self, world_x: f32, world_y: f32) -> (f32, f32) {
        (world_x - self.x, world_y - self.y)
    }
}

// A viewport wider than the world pins the offset at 0.
fn axis_offset(position: f32, viewport: f32, world_size: f32) -> f32 {
    let position = position.clamp(0.0, world_size);
    let max_offset = (world_size - viewport).max(0.0);
    (position - viewport / 2.0).clamp(0.0, max_offset)
}
