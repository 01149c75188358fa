//! Held-key tracking and movement intent generation

use macroquad::input::KeyCode;
use shared::{ClientMessage, Direction};
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementIntent {
    Move(Direction),
    Stop,
}

impl MovementIntent {
    pub fn to_message(self) -> ClientMessage {
        match self {
            MovementIntent::Move(direction) => ClientMessage::move_in(direction),
            MovementIntent::Stop => ClientMessage::Stop,
        }
    }
}

/// Maps arrows and WASD to movement directions.
pub fn direction_for_key(key: KeyCode) -> Option<Direction> {
    match key {
        KeyCode::Up | KeyCode::W => Some(Direction::Up),
        KeyCode::Down | KeyCode::S => Some(Direction::Down),
        KeyCode::Left | KeyCode::A => Some(Direction::Left),
        KeyCode::Right | KeyCode::D => Some(Direction::Right),
        _ => None,
    }
}

/// Turns key edges into movement intents.
///
/// The first movement key pressed emits right away; after that one intent
/// goes out per repeat interval for as long as any movement key is held.
/// Releasing the last one emits a single stop.
pub struct InputTranslator {
    held: HashSet<KeyCode>,
    repeat_interval: Duration,
    next_repeat: Option<Instant>,
}

impl InputTranslator {
    pub fn new(repeat_interval: Duration) -> Self {
        Self {
            held: HashSet::new(),
            repeat_interval: repeat_interval.max(Duration::from_millis(1)),
            next_repeat: None,
        }
    }

    pub fn repeat_interval(&self) -> Duration {
        self.repeat_interval
    }

    pub fn is_active(&self) -> bool {
        !self.held.is_empty()
    }

    /// Highest priority held direction: up, then down, then left, then right.
    pub fn current_direction(&self) -> Option<Direction> {
        self.held.iter().filter_map(|&key| direction_for_key(key)).min()
    }

    pub fn key_down(&mut self, key: KeyCode, now: Instant) -> Option<MovementIntent> {
        direction_for_key(key)?;
        let was_idle = self.held.is_empty();
        if !self.held.insert(key) || !was_idle {
            return None;
        }

        self.next_repeat = Some(now + self.repeat_interval);
        self.current_direction().map(MovementIntent::Move)
    }

    pub fn key_up(&mut self, key: KeyCode) -> Option<MovementIntent> {
        if !self.held.remove(&key) || !self.held.is_empty() {
            return None;
        }

        self.next_repeat = None;
        Some(MovementIntent::Stop)
    }

    /// Emits the repeat intent if it is due. Missed repeats are skipped
    /// rather than replayed.
    pub fn tick(&mut self, now: Instant) -> Option<MovementIntent> {
        let due = self.next_repeat?;
        if now < due {
            return None;
        }

        let interval = self.repeat_interval.as_nanos();
        let overshoot = (now - due).as_nanos() % interval;
        self.next_repeat = Some(now + Duration::from_nanos((interval - overshoot) as u64));
        self.current_direction().map(MovementIntent::Move)
    }

    /// Forgets held keys and cancels the repeat timer without emitting a stop.
    pub fn reset(&mut self) {
        self.held.clear();
        self.next_repeat = None;
    }
}

impl Default for InputTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_INTERVAL)
    }
}
