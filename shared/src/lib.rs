use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Side length of the square world, in world units. Fixed, never negotiated.
pub const WORLD_SIZE: f32 = 2048.0;

/// Which way an entity is looking. Only north/south/east carry frame data;
/// west is drawn by mirroring east.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    North,
    #[default]
    South,
    East,
    West,
}

impl Facing {
    /// Returns the direction that actually stores frames, and whether the
    /// frame has to be mirrored horizontally when drawn.
    pub fn canonical(self) -> (Facing, bool) {
        match self {
            Facing::West => (Facing::East, true),
            other => (other, false),
        }
    }
}

/// Movement direction carried by a `move` intent.
///
/// Declaration order is the priority order used when several keys are held.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub facing: Facing,
    #[serde(default)]
    pub is_moving: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub animation_frame: u32,
}

impl Player {
    pub fn new(id: impl Into<String>, x: f32, y: f32) -> Self {
        let id = id.into();
        Self {
            username: id.clone(),
            id,
            x,
            y,
            avatar: String::new(),
            facing: Facing::South,
            is_moving: false,
            animation_frame: 0,
        }
    }

    /// Position clamped to the world bounds.
    pub fn clamped_position(&self) -> (f32, f32) {
        (clamp_to_world(self.x), clamp_to_world(self.y))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AvatarFrames {
    #[serde(default)]
    pub north: Vec<String>,
    #[serde(default)]
    pub south: Vec<String>,
    #[serde(default)]
    pub east: Vec<String>,
}

impl AvatarFrames {
    /// Frame sources for a stored direction. West has no frames of its own.
    pub fn for_direction(&self, facing: Facing) -> &[String] {
        match facing {
            Facing::North => &self.north,
            Facing::South => &self.south,
            Facing::East => &self.east,
            Facing::West => &[],
        }
    }

    /// Every stored frame as `(direction, index, source)`.
    pub fn iter(&self) -> impl Iterator<Item = (Facing, usize, &str)> {
        [Facing::North, Facing::South, Facing::East]
            .into_iter()
            .flat_map(move |facing| {
                self.for_direction(facing)
                    .iter()
                    .enumerate()
                    .map(move |(index, source)| (facing, index, source.as_str()))
            })
    }

    pub fn len(&self) -> usize {
        self.north.len() + self.south.len() + self.east.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub name: String,
    #[serde(default)]
    pub frames: AvatarFrames,
}

/// Target of a `move` intent: a direction step or an absolute world position.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum MoveTarget {
    Direction { direction: Direction },
    Position { x: f32, y: f32 },
}

/// Intents sent from the client to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame { username: String },
    Move(MoveTarget),
    Stop,
}

impl ClientMessage {
    pub fn join(username: impl Into<String>) -> Self {
        ClientMessage::JoinGame {
            username: username.into(),
        }
    }

    pub fn move_in(direction: Direction) -> Self {
        ClientMessage::Move(MoveTarget::Direction { direction })
    }

    pub fn move_to(x: f32, y: f32) -> Self {
        ClientMessage::Move(MoveTarget::Position { x, y })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameResponse {
    pub success: bool,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub players: HashMap<String, Player>,
    #[serde(default)]
    pub avatars: HashMap<String, Avatar>,
}

/// Events pushed by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinGame(JoinGameResponse),
    PlayersMoved {
        players: HashMap<String, Player>,
    },
    PlayerJoined {
        player: Player,
        avatar: Avatar,
    },
    PlayerLeft {
        #[serde(rename = "playerId")]
        player_id: String,
    },
}

impl ServerMessage {
    /// Every `action` value the client understands.
    pub const ACTIONS: [&'static str; 4] =
        ["join_game", "players_moved", "player_joined", "player_left"];
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),
    #[error("message has no action field")]
    MissingAction,
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
}

/// Encodes an outbound intent as one text frame.
pub fn encode(message: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decodes one inbound text frame.
///
/// Unknown actions are reported separately from malformed payloads so the
/// caller can log them at a different level.
pub fn decode(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    let action = value
        .get("action")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingAction)?;
    if !ServerMessage::ACTIONS.contains(&action) {
        return Err(ProtocolError::UnknownAction(action.to_string()));
    }

    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}

pub fn clamp_to_world(value: f32) -> f32 {
    value.clamp(0.0, WORLD_SIZE)
}
