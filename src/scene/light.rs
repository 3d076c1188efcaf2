//! Directional light and its cookie slot

use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::Vec3;
use parking_lot::Mutex;

use crate::backend::TextureHandle;

/// Texture projected by a directional light, with its world-space size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCookie {
    pub texture: TextureHandle,
    pub size: f32,
}

/// Shared, mutable cookie assignment of a light.
///
/// Cloning the slot shares it: the cloud shadow pipeline keeps a clone and is the
/// only writer.
#[derive(Debug, Clone, Default)]
pub struct LightCookieSlot(Arc<Mutex<Option<LightCookie>>>);

impl LightCookieSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, cookie: LightCookie) {
        *self.0.lock() = Some(cookie);
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn get(&self) -> Option<LightCookie> {
        *self.0.lock()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

/// Directional light component (like the sun)
#[derive(Component, Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub cookie: LightCookieSlot,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            cookie: LightCookieSlot::new(),
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
            cookie: LightCookieSlot::new(),
        }
    }
}

/// Cookie slot of the first directional light in `world`
pub fn first_directional_light(world: &mut World) -> Option<LightCookieSlot> {
    let mut query = world.query::<&DirectionalLight>();
    query.iter(world).next().map(|light| light.cookie.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_clones_share_state() {
        let slot = LightCookieSlot::new();
        let writer = slot.clone();
        writer.set(LightCookie {
            texture: TextureHandle(3),
            size: 100.0,
        });
        assert_eq!(slot.get().map(|c| c.size), Some(100.0));
        writer.clear();
        assert!(!slot.is_set());
    }

    #[test]
    fn finds_directional_light_in_world() {
        let mut world = World::new();
        assert!(first_directional_light(&mut world).is_none());

        let light = DirectionalLight::default();
        let slot = light.cookie.clone();
        world.spawn(light);

        let found = first_directional_light(&mut world).unwrap();
        found.set(LightCookie {
            texture: TextureHandle(1),
            size: 1.0,
        });
        assert!(slot.is_set());
    }
}
