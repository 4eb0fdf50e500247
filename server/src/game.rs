//! Demo pirate game played on the scene server.
//!
//! Every session gets one ship at the map centre. Arrow keys sail it, the
//! pointer aims it and a click fires a cannonball at the pointer. Balls
//! explode when they arrive and damage any ship they overlap while burning.

use crate::config::ServerConfig;
use crate::entity::EntityTemplate;
use crate::scene::{EntityRegistry, Scene, SceneFactory, SceneResult, SessionContext};
use crate::session_manager::SessionManager;
use crate::world::World;
use log::debug;
use rand::Rng;
use serde_json::json;
use shared::protocol::keys;
use shared::screen::Rect;
use shared::{Color, EntityId, RemoteScreenRecorder, TextStyle};
use std::collections::HashMap;

pub const SHIP: &str = "ship";
pub const CANNONBALL: &str = "cannonball";
pub const CANNON_BALLS: &str = "cannon_balls";

const SHIP_SPEED: f32 = 200.0;
const BALL_SPEED: f32 = 400.0;
/// Health lost per second while overlapping a cannonball.
const HIT_RATE: f32 = 10.0;
const EXPLOSION_PHASES: u32 = 3;
const EXPLOSION_FRAME: f32 = 0.1;
const EXPLODE_TOKEN: &str = "explode:";

pub fn register_entities(registry: &mut EntityRegistry) {
    registry.register(SHIP, || {
        EntityTemplate::new("ship (1) (1)", (66.0, 113.0)).with_field("health", json!(100.0))
    });
    registry.register(CANNONBALL, || {
        EntityTemplate::new(CANNONBALL, (12.0, 12.0)).in_group(CANNON_BALLS)
    });
}

pub fn scene_factory() -> SceneFactory {
    Box::new(|| Box::new(PirateScene::new()))
}

/// Session manager with the pirate game wired in.
pub fn session_manager(config: &ServerConfig) -> SessionManager {
    let mut registry = EntityRegistry::new();
    register_entities(&mut registry);
    SessionManager::new(World::new(config.map_size), registry, scene_factory())
}

#[derive(Debug)]
struct CannonBall {
    target: (f32, f32),
    reached: bool,
    phases_left: u32,
}

pub struct PirateScene {
    hull: u32,
    ship: Option<EntityId>,
    health: f32,
    cannon_balls: HashMap<EntityId, CannonBall>,
}

impl PirateScene {
    pub fn new() -> Self {
        Self {
            hull: rand::thread_rng().gen_range(1..6),
            ship: None,
            health: 100.0,
            cannon_balls: HashMap::new(),
        }
    }

    fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    fn sprite(&self) -> String {
        let damage = if self.health <= 0.0 {
            4
        } else if self.health <= 33.0 {
            3
        } else if self.health <= 66.0 {
            2
        } else {
            1
        };
        format!("ship ({}) ({})", self.hull, damage)
    }

    /// Screen positions are relative to the ship, which the client keeps centred.
    fn to_world(&self, ctx: &SessionContext<'_>, pos: (f32, f32)) -> Option<(f32, f32)> {
        let ship = ctx.entity(self.ship.as_deref()?)?;
        let (w, h) = ctx.resolution();
        let (x, y) = ship.position();
        Some((x + pos.0 - w as f32 / 2.0, y + pos.1 - h as f32 / 2.0))
    }

    /// Where a ball fired at `target` leaves the hull, or `None` when the
    /// target is inside the ship.
    fn launch_point(&self, ctx: &SessionContext<'_>, target: (f32, f32)) -> Option<(f32, f32)> {
        let ship = ctx.entity(self.ship.as_deref()?)?;
        let (x, y) = ship.position();
        let (w, h) = ship.size();
        let clearance = ((w / 2.0).powi(2) + (h / 2.0).powi(2)).sqrt();
        let distance = ((target.0 - x).powi(2) + (target.1 - y).powi(2)).sqrt();
        if distance < clearance {
            return None;
        }
        let angle = ship.angle_to(target).to_radians();
        Some((x + clearance * angle.cos(), y - clearance * angle.sin()))
    }

    fn sail(&mut self, ctx: &mut SessionContext<'_>, dt: f32) {
        let Some(ship_id) = self.ship.clone() else {
            return;
        };
        let keyboard = ctx.keyboard();
        let dx = keyboard.axis(keys::LEFT, keys::RIGHT) * SHIP_SPEED * dt;
        let dy = keyboard.axis(keys::UP, keys::DOWN) * SHIP_SPEED * dt;
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        let Some(ship) = ctx.entity_mut(&ship_id) else {
            return;
        };
        let previous = ship.position();
        ship.move_by(dx, dy);
        if !ctx.is_inside_bounds(&ship_id) {
            if let Some(ship) = ctx.entity_mut(&ship_id) {
                ship.set_position(previous);
            }
        }
    }

    fn take_damage(&mut self, ctx: &mut SessionContext<'_>, dt: f32) {
        let Some(ship_id) = self.ship.clone() else {
            return;
        };
        if ctx.collide_group(&ship_id, CANNON_BALLS).is_empty() {
            return;
        }
        self.health = (self.health - HIT_RATE * dt).max(0.0);
        let sprite = self.sprite();
        if let Some(ship) = ctx.entity_mut(&ship_id) {
            ship.set_field("health", json!(self.health));
            ship.set_visual(sprite);
        }
    }

    fn move_cannon_balls(&mut self, ctx: &mut SessionContext<'_>, dt: f32) {
        let mut arrived = Vec::new();
        for (id, ball) in self.cannon_balls.iter_mut().filter(|(_, ball)| !ball.reached) {
            let Some(entity) = ctx.entity_mut(id) else {
                continue;
            };
            if entity.move_towards(ball.target, BALL_SPEED * dt) {
                ball.reached = true;
                arrived.push(id.clone());
            }
        }
        for id in arrived {
            self.explode(ctx, &id);
        }
    }

    /// Advances one explosion frame, removing the ball after the last one.
    fn explode(&mut self, ctx: &mut SessionContext<'_>, id: &str) {
        let Some(ball) = self.cannon_balls.get_mut(id) else {
            return;
        };
        if ball.phases_left == 0 {
            self.cannon_balls.remove(id);
            ctx.remove_entity(id);
            return;
        }
        let frame = format!("explosion{}", ball.phases_left);
        ball.phases_left -= 1;
        if let Some(entity) = ctx.entity_mut(id) {
            entity.set_visual(frame);
        }
        ctx.schedule(EXPLOSION_FRAME, format!("{}{}", EXPLODE_TOKEN, id));
    }

    fn draw_health_bar(&self, screen: &mut RemoteScreenRecorder) {
        let (width, height, padding) = (300.0, 20.0, 3.0);
        let bounds = screen.bounds();
        let (x, y) = (bounds.w - (width + 4.0 * padding), 2.0 * padding);
        let color = if self.health > 75.0 {
            Color::GREEN
        } else if self.health > 50.0 {
            Color::YELLOW
        } else {
            Color::RED
        };

        screen.rect(
            Rect::new(x - padding, y - padding, width + 2.0 * padding, height + 2.0 * padding),
            Color::BLACK,
            1,
        );
        screen.filled_rect(Rect::new(x, y, width * self.health / 100.0, height), color);
    }
}

impl Default for PirateScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for PirateScene {
    fn on_enter(&mut self, ctx: &mut SessionContext<'_>) -> SceneResult {
        let (w, h) = ctx.world().size();
        let ship = ctx.create_focus_entity(SHIP, (w / 2.0, h / 2.0))?;
        let sprite = self.sprite();
        if let Some(entity) = ctx.entity_mut(&ship) {
            entity.set_visual(sprite);
        }
        self.ship = Some(ship);
        Ok(())
    }

    fn on_mouse_move(
        &mut self,
        ctx: &mut SessionContext<'_>,
        pos: (f32, f32),
        _rel: (f32, f32),
        _buttons: &[u8],
    ) -> SceneResult {
        if self.is_dead() {
            return Ok(());
        }
        let (Some(target), Some(ship_id)) = (self.to_world(ctx, pos), self.ship.clone()) else {
            return Ok(());
        };
        if let Some(ship) = ctx.entity_mut(&ship_id) {
            let angle = ship.angle_to(target) + 90.0;
            ship.set_angle(angle);
        }
        Ok(())
    }

    fn on_mouse_down(&mut self, ctx: &mut SessionContext<'_>, pos: (f32, f32), _button: u8) -> SceneResult {
        if self.is_dead() {
            return Ok(());
        }
        let Some(target) = self.to_world(ctx, pos) else {
            return Ok(());
        };
        let Some(start) = self.launch_point(ctx, target) else {
            debug!("Session {} fired too close to its ship", ctx.session_id());
            return Ok(());
        };
        let id = ctx.create_entity(CANNONBALL, start)?;
        self.cannon_balls.insert(
            id,
            CannonBall {
                target,
                reached: false,
                phases_left: EXPLOSION_PHASES,
            },
        );
        Ok(())
    }

    fn on_timer(&mut self, ctx: &mut SessionContext<'_>, token: &str) -> SceneResult {
        if let Some(id) = token.strip_prefix(EXPLODE_TOKEN) {
            self.explode(ctx, id);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut SessionContext<'_>, dt: f32) -> SceneResult {
        self.move_cannon_balls(ctx, dt);
        if self.is_dead() {
            return Ok(());
        }
        self.sail(ctx, dt);
        self.take_damage(ctx, dt);
        Ok(())
    }

    fn draw(&mut self, ctx: &mut SessionContext<'_>, screen: &mut RemoteScreenRecorder) -> SceneResult {
        let name = ctx.client_str("name").unwrap_or("sailor").to_string();
        let width = screen.bounds().w;
        screen.text(&name, (width - 580.0, 0.0), &TextStyle::colored(Color::WHITE));
        if let Some(ship) = self.ship.as_deref().and_then(|id| ctx.entity(id)) {
            let label = format!("from server {}", ship.position().0 as i32);
            screen.text(&label, (width - 780.0, 0.0), &TextStyle::colored(Color::WHITE));
        }
        self.draw_health_bar(screen);
        Ok(())
    }
}
