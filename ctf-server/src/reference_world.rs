//! Minimal standalone collaborators so `main` links and runs end to end.
//!
//! spec.md §1 treats the Transport, Map, WorldKernel, and MasterClient as
//! out-of-scope collaborators — a real deployment brings its own voxel
//! generator, physics kernel, and master-list client. These are small,
//! deliberately unambitious stand-ins (flat ground, no real character
//! kinematics, a no-op master heartbeat) that satisfy the trait contracts
//! in `collaborators` well enough to run the binary against a real
//! client; they are not a reimplementation of the voxel generator or the
//! physics kernel those traits front for.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::collaborators::{CharacterHandle, GrenadeExplosion, GrenadeHandle, Map, MasterClient, Transport, WorldKernel};
use crate::math::Vec3;

/// Flat ground at a fixed height, with a sparse overlay of player-built
/// or player-removed points. Good enough to exercise settle/collision
/// logic without a real voxel generator.
pub struct FlatMap {
    ground_z: i32,
    overlay: HashMap<(i32, i32, i32), Option<u32>>,
}

impl FlatMap {
    pub fn new(ground_z: i32) -> Self {
        Self { ground_z, overlay: HashMap::new() }
    }
}

impl Default for FlatMap {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Map for FlatMap {
    fn get_color(&self, x: i32, y: i32, z: i32) -> u32 {
        match self.overlay.get(&(x, y, z)) {
            Some(Some(color)) => *color,
            Some(None) => 0,
            None if z == self.ground_z => 0x007f_7f7f,
            None => 0,
        }
    }

    fn get_z(&self, _x: i32, _y: i32, start: i32) -> i32 {
        self.ground_z.max(start)
    }

    fn get_solid(&self, x: i32, y: i32, z: i32) -> bool {
        match self.overlay.get(&(x, y, z)) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => z >= self.ground_z,
        }
    }

    fn set_point(&mut self, x: i32, y: i32, z: i32, rgba: (u8, u8, u8, u8)) -> bool {
        let packed = u32::from_be_bytes([rgba.3, rgba.0, rgba.1, rgba.2]);
        self.overlay.insert((x, y, z), Some(packed));
        true
    }

    fn remove_point(&mut self, x: i32, y: i32, z: i32) {
        self.overlay.insert((x, y, z), None);
    }

    fn generate(&self) -> Vec<u8> {
        // A real Map serializes the full voxel grid; the flat ground plus
        // sparse overlay used here has nothing worth shipping over the
        // wire beyond its dimensions.
        Vec::new()
    }
}

struct CharacterState {
    position: Vec3,
    orientation: Vec3,
    dead: bool,
}

struct GrenadeState {
    position: Vec3,
    velocity: Vec3,
    fuse_remaining: f64,
}

/// Tracks character/grenade positions well enough to drive the session
/// and CTF logic; does not simulate real gravity or collision against the
/// map (that belongs to the physics kernel this trait fronts for).
#[derive(Default)]
pub struct ReferenceWorldKernel {
    characters: HashMap<u32, CharacterState>,
    grenades: HashMap<u32, GrenadeState>,
    next_character: u32,
    next_grenade: u32,
}

impl ReferenceWorldKernel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorldKernel for ReferenceWorldKernel {
    fn create_character(&mut self, position: Vec3) -> CharacterHandle {
        let id = self.next_character;
        self.next_character += 1;
        self.characters.insert(id, CharacterState { position, orientation: [0.0, 0.0, 0.0], dead: false });
        CharacterHandle(id)
    }

    fn destroy_character(&mut self, handle: CharacterHandle) {
        self.characters.remove(&handle.0);
    }

    fn character_position(&self, handle: CharacterHandle) -> Vec3 {
        self.characters.get(&handle.0).map(|c| c.position).unwrap_or([0.0, 0.0, 0.0])
    }

    fn character_orientation(&self, handle: CharacterHandle) -> Vec3 {
        self.characters.get(&handle.0).map(|c| c.orientation).unwrap_or([0.0, 0.0, 0.0])
    }

    fn character_acceleration(&self, _handle: CharacterHandle) -> Vec3 {
        // Grounded by construction: client-reported position is
        // authoritative (subject to rubber-banding), so this reference
        // kernel always reports the "on ground" window the jump gate
        // checks for.
        [0.0, 0.0, 0.0]
    }

    fn character_dead(&self, handle: CharacterHandle) -> bool {
        self.characters.get(&handle.0).map(|c| c.dead).unwrap_or(true)
    }

    fn set_character_position(&mut self, handle: CharacterHandle, pos: Vec3, _teleport: bool) {
        if let Some(c) = self.characters.get_mut(&handle.0) {
            c.position = pos;
        }
    }

    fn set_character_orientation(&mut self, handle: CharacterHandle, orientation: Vec3) {
        if let Some(c) = self.characters.get_mut(&handle.0) {
            c.orientation = orientation;
        }
    }

    fn set_character_walk(&mut self, _handle: CharacterHandle, _up: bool, _down: bool, _left: bool, _right: bool) {}

    fn set_character_animation(&mut self, _handle: CharacterHandle, _fire: bool, _jump: bool, _crouch: bool, _aim: bool) {}

    fn set_character_dead(&mut self, handle: CharacterHandle, dead: bool) {
        if let Some(c) = self.characters.get_mut(&handle.0) {
            c.dead = dead;
        }
    }

    fn get_hit_direction(&self, handle: CharacterHandle, from: Vec3) -> u8 {
        let Some(c) = self.characters.get(&handle.0) else { return 0 };
        let dx = from[0] - c.position[0];
        let dy = from[1] - c.position[1];
        (dy.atan2(dx).to_degrees().rem_euclid(360.0) / 45.0) as u8
    }

    fn create_grenade(&mut self, position: Vec3, velocity: Vec3, fuse: f64) -> GrenadeHandle {
        let id = self.next_grenade;
        self.next_grenade += 1;
        self.grenades.insert(id, GrenadeState { position, velocity, fuse_remaining: fuse });
        GrenadeHandle(id)
    }

    fn destroy_grenade(&mut self, handle: GrenadeHandle) {
        self.grenades.remove(&handle.0);
    }

    fn grenade_position(&self, handle: GrenadeHandle) -> Vec3 {
        self.grenades.get(&handle.0).map(|g| g.position).unwrap_or([0.0, 0.0, 0.0])
    }

    fn grenade_damage(&self, _handle: GrenadeHandle, _point: Vec3) -> i32 {
        100
    }

    fn update(&mut self, dt: f64) -> Vec<GrenadeExplosion> {
        const GRAVITY: f32 = -9.8;
        let mut exploded = Vec::new();
        for (&id, grenade) in self.grenades.iter_mut() {
            grenade.velocity[2] += GRAVITY * dt as f32;
            grenade.position[0] += grenade.velocity[0] * dt as f32;
            grenade.position[1] += grenade.velocity[1] * dt as f32;
            grenade.position[2] += grenade.velocity[2] * dt as f32;
            grenade.fuse_remaining -= dt;
            if grenade.fuse_remaining <= 0.0 {
                exploded.push(GrenadeExplosion { handle: GrenadeHandle(id), position: grenade.position });
            }
        }
        for explosion in &exploded {
            self.grenades.remove(&explosion.handle.0);
        }
        exploded
    }
}

/// Sends datagrams over a shared `tokio` UDP socket. Receiving and
/// demultiplexing by address is the caller's job (`main`'s recv loop),
/// matching spec.md §4.6: the Transport collaborator here only owns
/// outbound framing.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8], addr: SocketAddr) {
        if let Err(err) = self.socket.try_send_to(bytes, addr) {
            tracing::debug!(%addr, %err, "dropped outbound datagram");
        }
    }
}

/// A master-list client that never actually dials out. The real
/// registration client is explicitly out of scope.
#[derive(Debug, Default)]
pub struct NoopMasterClient;

impl MasterClient for NoopMasterClient {
    fn set_count(&mut self, _count: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_map_is_solid_at_and_below_ground() {
        let map = FlatMap::new(10);
        assert!(map.get_solid(0, 0, 10));
        assert!(!map.get_solid(0, 0, 9));
    }

    #[test]
    fn flat_map_overlay_overrides_ground() {
        let mut map = FlatMap::new(10);
        assert!(!map.get_solid(5, 5, 3));
        map.set_point(5, 5, 3, (255, 0, 0, 255));
        assert!(map.get_solid(5, 5, 3));
        map.remove_point(5, 5, 3);
        assert!(!map.get_solid(5, 5, 3));
    }

    #[test]
    fn reference_world_kernel_tracks_character_position() {
        let mut world = ReferenceWorldKernel::new();
        let handle = world.create_character([1.0, 2.0, 3.0]);
        assert_eq!(world.character_position(handle), [1.0, 2.0, 3.0]);
        world.set_character_position(handle, [4.0, 5.0, 6.0], true);
        assert_eq!(world.character_position(handle), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn reference_world_kernel_explodes_grenade_when_fuse_elapses() {
        let mut world = ReferenceWorldKernel::new();
        let handle = world.create_grenade([0.0, 0.0, 0.0], [0.0, 0.0, 0.0], 1.0);
        assert!(world.update(0.5).is_empty());
        let explosions = world.update(0.6);
        assert_eq!(explosions.len(), 1);
        assert_eq!(explosions[0].handle, handle);
    }
}
