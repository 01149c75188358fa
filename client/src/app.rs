use crate::game::{WorldSnapshot, WorldStore};
use crate::input::{InputTranslator, MovementIntent};
use crate::network::{ConnectionManager, Connector};
use crate::preferences::{DeviceClass, UiVisibility};
use crate::rendering::{pointer_to_world, render_frame, FrameScheduler, MacroquadSurface, Presenter, Surface};
use crate::sprites::{FrameDecoder, SpriteResolver};
use log::{debug, info, trace};
use macroquad::prelude::*;
use std::time::Instant;
use tokio::sync::mpsc;

/// Owns every client component and routes events between them.
pub struct GameClient<C: Connector, D: FrameDecoder> {
    connection: ConnectionManager<C>,
    store: WorldStore,
    updates: mpsc::UnboundedReceiver<WorldSnapshot>,
    snapshot: WorldSnapshot,
    sprites: SpriteResolver<D>,
    input: InputTranslator,
    scheduler: FrameScheduler,
}

impl<C: Connector, D: FrameDecoder> GameClient<C, D> {
    pub fn new(
        connection: ConnectionManager<C>,
        sprites: SpriteResolver<D>,
        input: InputTranslator,
        viewport: (f32, f32),
    ) -> Self {
        let mut store = WorldStore::new(viewport.0, viewport.1);
        let updates = store.subscribe();
        let snapshot = store.snapshot();
        let mut scheduler = FrameScheduler::new();
        scheduler.request_redraw();

        Self {
            connection,
            store,
            updates,
            snapshot,
            sprites,
            input,
            scheduler,
        }
    }

    pub fn start(&mut self) {
        self.connection.connect();
    }

    pub fn change_identity(&mut self, username: &str) {
        self.connection.change_identity(username, &mut self.store);
    }

    pub fn key_down(&mut self, key: KeyCode, now: Instant) {
        if let Some(intent) = self.input.key_down(key, now) {
            self.send_intent(intent);
        }
    }

    pub fn key_up(&mut self, key: KeyCode) {
        if let Some(intent) = self.input.key_up(key) {
            self.send_intent(intent);
        }
    }

    pub fn tick_input(&mut self, now: Instant) {
        if let Some(intent) = self.input.tick(now) {
            self.send_intent(intent);
        }
    }

    fn send_intent(&self, intent: MovementIntent) {
        trace!("Movement intent: {:?}", intent);
        self.connection.send(&intent.to_message());
    }

    /// Sends a one-shot move to the world position under the pointer.
    pub fn click(&mut self, pointer: (f32, f32)) {
        let (x, y) = pointer_to_world(pointer, &self.snapshot.camera);
        debug!("Click at {:?} -> world ({:.0}, {:.0})", pointer, x, y);
        self.connection.send_move_to(x, y);
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        let before = self.device_class();
        self.store.set_viewport(width, height);
        let after = self.device_class();
        if before != after {
            debug!("Layout switched to {:?}, panels {:?}", after, self.ui_visibility());
        }
        self.scheduler.request_redraw();
    }

    /// Layout class of the current viewport.
    pub fn device_class(&self) -> DeviceClass {
        DeviceClass::from_viewport_width(self.store.viewport().0)
    }

    /// Panel visibility saved for the current layout.
    pub fn ui_visibility(&self) -> UiVisibility {
        self.connection.preferences().ui_visibility(self.device_class())
    }

    /// Applies transport events, picks up the newest snapshot, and uploads
    /// finished sprite decodes.
    pub fn update(&mut self, now: Instant) {
        self.connection.poll(now, &mut self.store);

        let mut latest = None;
        while let Ok(snapshot) = self.updates.try_recv() {
            latest = Some(snapshot);
        }
        if let Some(snapshot) = latest {
            self.snapshot = snapshot;
            let started = self.sprites.observe(&self.snapshot.avatars);
            if started > 0 {
                debug!("Decoding {} new avatar(s)", started);
            }
            self.scheduler.request_redraw();
        }

        if self.sprites.poll() {
            self.scheduler.request_redraw();
        }
    }

    pub fn request_redraw(&mut self) {
        self.scheduler.request_redraw();
    }

    pub fn frame_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Draws the pending frame, if any. Returns the number of entities drawn.
    pub fn render<S>(&mut self, surface: &mut S) -> Option<usize>
    where
        S: Surface<Sprite = D::Sprite>,
    {
        if !self.scheduler.take_frame() {
            return None;
        }
        Some(render_frame(&self.snapshot, &self.sprites, surface))
    }

    pub fn snapshot(&self) -> &WorldSnapshot {
        &self.snapshot
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<C> {
        &mut self.connection
    }

    /// Stops the reconnect timer, the repeat timer, and any pending frame.
    pub fn teardown(&mut self) {
        self.connection.disconnect();
        self.input.reset();
        self.scheduler.cancel();
    }
}

/// Main loop. Runs once per display refresh until the window is closed.
pub async fn run<C, D>(mut client: GameClient<C, D>, background: Option<Texture2D>)
where
    C: Connector,
    D: FrameDecoder<Sprite = Texture2D>,
{
    prevent_quit();
    let mut presenter = Presenter::new(screen_width(), screen_height());
    client.resize(screen_width(), screen_height());
    info!("{:?} layout, panels {:?}", client.device_class(), client.ui_visibility());
    client.start();

    loop {
        let now = Instant::now();

        if is_quit_requested() {
            info!("Window closed, shutting down");
            client.teardown();
            break;
        }

        let (width, height) = (screen_width(), screen_height());
        if presenter.resize(width, height) {
            debug!("Viewport resized to {}x{}", width, height);
            client.resize(width, height);
        }

        for key in get_keys_pressed() {
            client.key_down(key, now);
        }
        for key in get_keys_released() {
            client.key_up(key);
        }
        client.tick_input(now);

        if is_mouse_button_pressed(MouseButton::Left) {
            client.click(mouse_position());
        }

        client.update(now);

        if client.frame_pending() {
            let (width, height) = presenter.size();
            presenter.draw_offscreen(|| {
                let mut surface = MacroquadSurface::new(background.as_ref(), width, height);
                if let Some(drawn) = client.render(&mut surface) {
                    trace!("Frame drew {} entities", drawn);
                }
            });
        }
        presenter.present();

        next_frame().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::{join_text, sent_json, FakeConnector};
    use crate::network::{ConnectionConfig, ConnectionState, TransportEvent};
    use crate::preferences::PreferenceStore;
    use crate::sprites::tests::SizeDecoder;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;
    use std::time::Duration;
    use tokio::runtime::Handle;

    struct NullSurface;

    impl Surface for NullSurface {
        type Sprite = (f32, f32);

        fn viewport(&self) -> (f32, f32) {
            (800.0, 600.0)
        }
        fn clear(&mut self) {}
        fn draw_background(&mut self, _x: f32, _y: f32) {}
        fn draw_sprite(&mut self, _sprite: &(f32, f32), _x: f32, _y: f32, _flip_x: bool) {}
        fn measure_label(&self, _text: &str, _style: crate::rendering::LabelStyle) -> f32 {
            0.0
        }
        fn draw_label(&mut self, _text: &str, _x: f32, _y: f32, _style: crate::rendering::LabelStyle) {}
        fn draw_moving_marker(&mut self, _x: f32, _y: f32) {}
        fn draw_connecting_overlay(&mut self) {}
    }

    fn client() -> (GameClient<FakeConnector, SizeDecoder>, FakeConnector) {
        let connector = FakeConnector::default();
        let connection = ConnectionManager::new(
            ConnectionConfig::default(),
            connector.clone(),
            PreferenceStore::in_memory(),
        );
        let sprites = SpriteResolver::new(SizeDecoder, Handle::current());
        let client = GameClient::new(connection, sprites, InputTranslator::default(), (800.0, 600.0));
        (client, connector)
    }

    fn joined_client(now: Instant) -> (GameClient<FakeConnector, SizeDecoder>, FakeConnector) {
        let (mut client, connector) = client();
        client.start();
        connector.emit(TransportEvent::Opened { generation: 1 });
        connector.emit(TransportEvent::Message {
            generation: 1,
            text: join_text("p1", "Tim"),
        });
        client.update(now);
        // Drop the join request.
        connector.sent(0);
        (client, connector)
    }

    #[tokio::test]
    async fn test_first_frame_pending_until_rendered() {
        let (mut client, _connector) = client();
        assert!(client.frame_pending());
        assert_eq!(client.render(&mut NullSurface), Some(0));
        assert!(!client.frame_pending());
        assert_eq!(client.render(&mut NullSurface), None);
    }

    #[tokio::test]
    async fn test_updates_collapse_into_one_frame() {
        let now = Instant::now();
        let (mut client, connector) = joined_client(now);
        client.render(&mut NullSurface);

        for x in [600.0, 610.0, 620.0] {
            connector.emit(TransportEvent::Message {
                generation: 1,
                text: json!({"action": "players_moved", "players": {
                    "p1": {"id": "p1", "x": x, "y": 500, "username": "Tim"}
                }})
                .to_string(),
            });
        }
        client.update(now);

        assert!(client.frame_pending());
        assert_approx_eq!(client.snapshot().players["p1"].x, 620.0);
        assert!(client.render(&mut NullSurface).is_some());
        assert!(client.render(&mut NullSurface).is_none());
    }

    #[tokio::test]
    async fn test_keys_become_move_and_stop() {
        let now = Instant::now();
        let (mut client, connector) = joined_client(now);

        client.key_down(KeyCode::Up, now);
        client.tick_input(now + Duration::from_millis(50));
        client.key_up(KeyCode::Up);

        let sent: Vec<_> = connector.sent(0).iter().map(sent_json).collect();
        assert_eq!(
            sent,
            vec![
                json!({"action": "move", "direction": "up"}),
                json!({"action": "move", "direction": "up"}),
                json!({"action": "stop"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_click_sends_world_position() {
        let now = Instant::now();
        let (mut client, connector) = joined_client(now);
        // p1 at (500, 500) in an 800x600 viewport puts the camera at (100, 200).
        assert_eq!(client.snapshot().camera.x, 100.0);
        assert_eq!(client.snapshot().camera.y, 200.0);

        client.click((10.0, 20.0));
        let sent = connector.sent(0);
        assert_eq!(sent_json(&sent[0]), json!({"action": "move", "x": 110.0, "y": 220.0}));
    }

    #[tokio::test]
    async fn test_resize_recenters_and_redraws() {
        let now = Instant::now();
        let (mut client, _connector) = joined_client(now);
        client.render(&mut NullSurface);

        client.resize(400.0, 400.0);
        client.update(now);
        assert!(client.frame_pending());
        assert_eq!(client.snapshot().camera.x, 300.0);
        assert_eq!(client.snapshot().camera.y, 300.0);
    }

    #[tokio::test]
    async fn test_panel_visibility_follows_layout() {
        let (mut client, _connector) = client();
        assert_eq!(client.device_class(), DeviceClass::Mobile);

        let shown = UiVisibility {
            minimap: true,
            ..Default::default()
        };
        client
            .connection_mut()
            .preferences_mut()
            .set_ui_visibility(DeviceClass::Mobile, shown)
            .unwrap();
        assert_eq!(client.ui_visibility(), shown);

        client.resize(1280.0, 720.0);
        assert_eq!(client.device_class(), DeviceClass::Desktop);
        assert_eq!(client.ui_visibility(), UiVisibility::default());
    }

    #[tokio::test]
    async fn test_teardown_stops_everything() {
        let now = Instant::now();
        let (mut client, connector) = joined_client(now);
        client.key_down(KeyCode::Right, now);
        connector.sent(0);

        client.teardown();
        assert_eq!(client.connection().state(), ConnectionState::Terminated);
        assert!(!client.frame_pending());

        client.tick_input(now + Duration::from_millis(500));
        client.update(now + Duration::from_secs(10));
        assert_eq!(connector.count(), 1);
    }
}
