use crate::camera::Camera;
use log::debug;
use shared::{Avatar, JoinGameResponse, Player};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Copy of the mirrored world handed to the subscriber after every mutation.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub connected: bool,
    pub player_id: Option<String>,
    pub players: HashMap<String, Player>,
    pub avatars: HashMap<String, Arc<Avatar>>,
    pub camera: Camera,
}

impl WorldSnapshot {
    pub fn local_player(&self) -> Option<&Player> {
        self.player_id.as_ref().and_then(|id| self.players.get(id))
    }

    pub fn is_local(&self, player_id: &str) -> bool {
        self.player_id.as_deref() == Some(player_id)
    }
}

/// Client-side mirror of the server's world.
///
/// Mutated only from the main loop while draining transport events, so a
/// subscriber never sees a half-applied update.
pub struct WorldStore {
    state: WorldSnapshot,
    viewport: (f32, f32),
    subscriber: Option<mpsc::UnboundedSender<WorldSnapshot>>,
}

impl WorldStore {
    pub fn new(viewport_width: f32, viewport_height: f32) -> Self {
        Self {
            state: WorldSnapshot::default(),
            viewport: (viewport_width, viewport_height),
            subscriber: None,
        }
    }

    /// Replaces the active subscriber. The previous receiver stops getting updates.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<WorldSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriber = Some(tx);
        rx
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.state.clone()
    }

    pub fn state(&self) -> &WorldSnapshot {
        &self.state
    }

    pub fn viewport(&self) -> (f32, f32) {
        self.viewport
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.state.connected = connected;
        self.notify();
    }

    /// Bulk replace from a successful join.
    ///
    /// `local_name` is re-applied to the local player when a rename was in
    /// flight, since the server snapshot may still carry the old name.
    pub fn apply_join(&mut self, player_id: String, response: JoinGameResponse, local_name: Option<&str>) {
        self.state.players = response.players;
        self.state.avatars = response
            .avatars
            .into_iter()
            .map(|(name, avatar)| (name, Arc::new(avatar)))
            .collect();

        if let (Some(name), Some(player)) = (local_name, self.state.players.get_mut(&player_id)) {
            player.username = name.to_string();
        }
        self.state.player_id = Some(player_id);

        self.recenter_camera();
        self.notify();
    }

    /// Merges a partial roster; the latest arrival wins for every id it names.
    pub fn apply_players_moved(&mut self, players: HashMap<String, Player>) {
        let local_moved = self
            .state
            .player_id
            .as_ref()
            .is_some_and(|id| players.contains_key(id));

        self.state.players.extend(players);

        if local_moved {
            self.recenter_camera();
        }
        self.notify();
    }

    pub fn apply_player_joined(&mut self, player: Player, avatar: Avatar) {
        self.state.players.insert(player.id.clone(), player);
        self.state
            .avatars
            .insert(avatar.name.clone(), Arc::new(avatar));
        self.notify();
    }

    pub fn apply_player_left(&mut self, player_id: &str) {
        if self.state.players.remove(player_id).is_some() {
            self.notify();
        }
    }

    /// Optimistically shows a new display name for the local player.
    pub fn rename_local(&mut self, username: &str) {
        let Some(id) = self.state.player_id.as_ref() else {
            return;
        };
        if let Some(player) = self.state.players.get_mut(id) {
            player.username = username.to_string();
            self.notify();
        }
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width, height);
        if self.recenter_camera() {
            self.notify();
        }
    }

    /// Drops everything the connection owned. The camera stays where it was.
    pub fn reset(&mut self) {
        self.state.connected = false;
        self.state.player_id = None;
        self.state.players.clear();
        self.state.avatars.clear();
        self.notify();
    }

    fn recenter_camera(&mut self) -> bool {
        let Some(player) = self.state.local_player() else {
            return false;
        };
        let (x, y) = player.clamped_position();
        let (width, height) = self.viewport;
        self.state.camera = Camera::follow(x, y, width, height);
        true
    }

    fn notify(&mut self) {
        if let Some(subscriber) = &self.subscriber {
            if subscriber.send(self.state.clone()).is_err() {
                debug!("State subscriber dropped");
                self.subscriber = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{AvatarFrames, Facing};

    fn avatar(name: &str) -> Avatar {
        Avatar {
            name: name.to_string(),
            frames: AvatarFrames {
                north: vec!["n".into()],
                south: vec!["s".into()],
                east: vec!["e".into()],
            },
        }
    }

    fn join_response(players: Vec<Player>, avatars: Vec<Avatar>) -> JoinGameResponse {
        JoinGameResponse {
            success: true,
            player_id: Some("me".to_string()),
            players: players.into_iter().map(|p| (p.id.clone(), p)).collect(),
            avatars: avatars.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    fn joined_store() -> WorldStore {
        let mut store = WorldStore::new(800.0, 600.0);
        let response = join_response(
            vec![Player::new("me", 1000.0, 1000.0), Player::new("other", 50.0, 60.0)],
            vec![avatar("knight")],
        );
        store.apply_join("me".to_string(), response, None);
        store
    }

    #[test]
    fn test_join_replaces_roster_and_avatars() {
        let mut store = WorldStore::new(800.0, 600.0);
        store.apply_player_joined(Player::new("stale", 1.0, 1.0), avatar("ghost"));

        let response = join_response(vec![Player::new("me", 1000.0, 1000.0)], vec![avatar("knight")]);
        store.apply_join("me".to_string(), response.clone(), None);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.player_id.as_deref(), Some("me"));
        assert_eq!(snapshot.players, response.players);
        assert_eq!(snapshot.avatars.len(), 1);
        assert_eq!(*snapshot.avatars["knight"], response.avatars["knight"]);
        assert_approx_eq!(snapshot.camera.x, 600.0);
        assert_approx_eq!(snapshot.camera.y, 700.0);
    }

    #[test]
    fn test_join_reapplies_pending_name() {
        let mut store = WorldStore::new(800.0, 600.0);
        let mut me = Player::new("me", 10.0, 10.0);
        me.username = "OldName".to_string();
        store.apply_join("me".to_string(), join_response(vec![me], vec![]), Some("NewName"));
        assert_eq!(store.state().players["me"].username, "NewName");
    }

    #[test]
    fn test_players_moved_is_idempotent() {
        let mut store = joined_store();
        let mut moved = Player::new("other", 300.0, 400.0);
        moved.facing = Facing::East;
        moved.is_moving = true;
        let update: HashMap<_, _> = [("other".to_string(), moved)].into_iter().collect();

        store.apply_players_moved(update.clone());
        let once = store.snapshot();
        store.apply_players_moved(update);
        let twice = store.snapshot();

        assert_eq!(once.players, twice.players);
        assert_eq!(once.camera, twice.camera);
        assert_approx_eq!(twice.players["other"].x, 300.0);
    }

    #[test]
    fn test_players_moved_last_write_wins() {
        let mut store = joined_store();
        for x in [100.0, 200.0, 150.0] {
            let update = [("other".to_string(), Player::new("other", x, 0.0))].into_iter().collect();
            store.apply_players_moved(update);
        }
        assert_approx_eq!(store.state().players["other"].x, 150.0);
    }

    #[test]
    fn test_camera_follows_only_local_player() {
        let mut store = joined_store();
        let before = store.state().camera;

        let update = [("other".to_string(), Player::new("other", 2000.0, 2000.0))].into_iter().collect();
        store.apply_players_moved(update);
        assert_eq!(store.state().camera, before);

        let update = [("me".to_string(), Player::new("me", 1200.0, 1100.0))].into_iter().collect();
        store.apply_players_moved(update);
        assert_approx_eq!(store.state().camera.x, 800.0);
        assert_approx_eq!(store.state().camera.y, 800.0);
    }

    #[test]
    fn test_player_joined_and_left() {
        let mut store = joined_store();
        store.apply_player_joined(Player::new("new", 5.0, 5.0), avatar("mage"));
        assert!(store.state().players.contains_key("new"));
        assert!(store.state().avatars.contains_key("mage"));

        store.apply_player_left("new");
        assert!(!store.state().players.contains_key("new"));
        // Avatars are never removed.
        assert!(store.state().avatars.contains_key("mage"));
    }

    #[test]
    fn test_player_left_unknown_does_not_notify() {
        let mut store = joined_store();
        let mut updates = store.subscribe();
        store.apply_player_left("nobody");
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_subscriber_gets_copy_per_mutation() {
        let mut store = WorldStore::new(800.0, 600.0);
        let mut updates = store.subscribe();

        store.set_connected(true);
        store.apply_player_joined(Player::new("a", 1.0, 1.0), avatar("knight"));

        let first = updates.try_recv().unwrap();
        assert!(first.connected);
        assert!(first.players.is_empty());

        let mut second = updates.try_recv().unwrap();
        second.players.clear();
        assert!(store.state().players.contains_key("a"));
    }

    #[test]
    fn test_resubscribe_replaces_previous() {
        let mut store = WorldStore::new(800.0, 600.0);
        let mut old = store.subscribe();
        let mut new = store.subscribe();
        store.set_connected(true);
        assert!(old.try_recv().is_err());
        assert!(new.try_recv().is_ok());
    }

    #[test]
    fn test_rename_local() {
        let mut store = joined_store();
        store.rename_local("Grace");
        assert_eq!(store.state().players["me"].username, "Grace");
        assert_eq!(store.state().players["other"].username, "other");
    }

    #[test]
    fn test_reset_clears_connection_state() {
        let mut store = joined_store();
        store.set_connected(true);
        let camera = store.state().camera;
        store.reset();

        let state = store.state();
        assert!(!state.connected);
        assert!(state.player_id.is_none());
        assert!(state.players.is_empty());
        assert!(state.avatars.is_empty());
        assert_eq!(state.camera, camera);
    }

    #[test]
    fn test_viewport_change_recenters() {
        let mut store = joined_store();
        store.set_viewport(400.0, 400.0);
        assert_approx_eq!(store.state().camera.x, 800.0);
        assert_approx_eq!(store.state().camera.y, 800.0);
    }
}
