//! Thin trait contracts for everything spec.md treats as "out of scope":
//! the Transport, the voxel Map, the WorldKernel physics engine, the
//! master-list client, and the single extension/hook interface chat
//! commands and plugins attach to.
//!
//! None of these are implemented by this crate — a real deployment wires
//! concrete collaborators in; the test suite under `tests/` wires in
//! stand-ins just capable enough to drive the scenarios in spec.md §8.

use std::net::SocketAddr;

use ctf_common::Veto;

use crate::math::Vec3;
use crate::team::TeamId;

/// The UDP framing/reliability layer. The core only ever
/// pushes bytes out through `send`; how those bytes get packaged into
/// datagrams, retried, and demultiplexed back to a Session by address is
/// entirely the Transport's concern.
pub trait Transport {
    fn send(&mut self, bytes: &[u8], addr: SocketAddr);
}

/// Opaque handle to a WorldKernel-owned character. Stable for the
/// lifetime of the character; never reused while the character is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacterHandle(pub u32);

/// Opaque handle to a WorldKernel-owned grenade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrenadeHandle(pub u32);

/// A grenade that finished its fuse and detonated this tick. The
/// WorldKernel reports these from `update()` rather than invoking a
/// stored closure — see DESIGN.md: a callback closing over the thrower
/// does not cross an object-safe trait boundary cleanly, so the core
/// keeps its own handle -> thrower side table instead (see
/// `ctf_rules::GrenadeRegistry`).
#[derive(Debug, Clone, Copy)]
pub struct GrenadeExplosion {
    pub handle: GrenadeHandle,
    pub position: Vec3,
}

/// A character whose landing this tick exceeded the kernel's safe-fall
/// threshold, with the impact damage it computed from fall velocity.
/// Reported the same way as `GrenadeExplosion`: the kernel owns the
/// kinematics, the core owns hp and the kill sequence.
#[derive(Debug, Clone, Copy)]
pub struct FallImpact {
    pub character: CharacterHandle,
    pub damage: i32,
}

/// The physics kernel for characters and grenades.
pub trait WorldKernel {
    fn create_character(&mut self, position: Vec3) -> CharacterHandle;
    fn destroy_character(&mut self, handle: CharacterHandle);

    fn character_position(&self, handle: CharacterHandle) -> Vec3;
    fn character_orientation(&self, handle: CharacterHandle) -> Vec3;
    fn character_acceleration(&self, handle: CharacterHandle) -> Vec3;
    fn character_dead(&self, handle: CharacterHandle) -> bool;
    fn set_character_position(&mut self, handle: CharacterHandle, pos: Vec3, teleport: bool);
    fn set_character_orientation(&mut self, handle: CharacterHandle, orientation: Vec3);
    fn set_character_walk(&mut self, handle: CharacterHandle, up: bool, down: bool, left: bool, right: bool);
    fn set_character_animation(&mut self, handle: CharacterHandle, fire: bool, jump: bool, crouch: bool, aim: bool);
    fn set_character_dead(&mut self, handle: CharacterHandle, dead: bool);
    fn get_hit_direction(&self, handle: CharacterHandle, from: Vec3) -> u8;

    fn create_grenade(&mut self, position: Vec3, velocity: Vec3, fuse: f64) -> GrenadeHandle;
    fn destroy_grenade(&mut self, handle: GrenadeHandle);
    fn grenade_position(&self, handle: GrenadeHandle) -> Vec3;
    fn grenade_damage(&self, handle: GrenadeHandle, point: Vec3) -> i32;

    /// Advances all owned objects by `dt` seconds and reports any
    /// grenades that detonated during this step.
    fn update(&mut self, dt: f64) -> Vec<GrenadeExplosion>;

    /// Characters whose landing this step crossed the kernel's fall-damage
    /// threshold. Default is empty for kernels (like the bundled reference
    /// one) that don't model character gravity themselves, since hp lives
    /// on the core's `Session`, not here.
    fn take_fall_impacts(&mut self) -> Vec<FallImpact> {
        Vec::new()
    }
}

/// The voxel map container and its generator.
pub trait Map {
    fn get_color(&self, x: i32, y: i32, z: i32) -> u32;
    fn get_z(&self, x: i32, y: i32, start: i32) -> i32;
    fn get_solid(&self, x: i32, y: i32, z: i32) -> bool;
    fn set_point(&mut self, x: i32, y: i32, z: i32, rgba: (u8, u8, u8, u8)) -> bool;
    fn remove_point(&mut self, x: i32, y: i32, z: i32);
    /// Serializes the full map for transfer; the caller zlib-compresses
    /// and chunks the result.
    fn generate(&self) -> Vec<u8>;
}

/// The master-list registration client.
pub trait MasterClient {
    fn set_count(&mut self, count: u32);
}

/// Identifies a session for extension hooks without exposing the full
/// `Session` type to collaborators.
pub type SessionId = u32;

/// Single extension/hook interface. Every method has a no-op/Allow
/// default, per spec.md §9: hook classes with empty overridable methods
/// are replaced by one interface whose methods may veto or substitute a
/// value, with the no-op as the default implementation rather than a
/// separate base class.
#[allow(unused_variables)]
pub trait Extension {
    fn on_connect(&mut self, session: SessionId) -> Veto<()> {
        Veto::Allow
    }
    fn on_login(&mut self, session: SessionId, name: &str) {}
    fn on_join(&mut self, session: SessionId) {}
    fn on_team_join(&mut self, session: SessionId, team: TeamId) -> Veto<TeamId> {
        Veto::Allow
    }
    fn on_team_leave(&mut self, session: SessionId) {}
    fn on_spawn(&mut self, session: SessionId, pos: Vec3) {}
    fn on_position_update(&mut self, session: SessionId) {}
    fn on_hack_attempt(&mut self, session: SessionId, message: &str) {}
    fn on_hit(&mut self, attacker: SessionId, victim: SessionId, amount: i32) -> Veto<i32> {
        Veto::Allow
    }
    fn on_kill(&mut self, victim: SessionId, killer: Option<SessionId>) {}
    fn on_fall(&mut self, session: SessionId, damage: i32) -> Veto<i32> {
        Veto::Allow
    }
    fn on_tool_set_attempt(&mut self, session: SessionId, tool: u8) -> Veto<u8> {
        Veto::Allow
    }
    fn on_tool_changed(&mut self, session: SessionId, tool: u8) {}
    fn on_color_set_attempt(&mut self, session: SessionId, color: (u8, u8, u8)) -> Veto<(u8, u8, u8)> {
        Veto::Allow
    }
    fn on_color_set(&mut self, session: SessionId, color: (u8, u8, u8)) {}
    fn on_weapon_set(&mut self, session: SessionId, weapon: u8) -> Veto<u8> {
        Veto::Allow
    }
    fn on_grenade(&mut self, session: SessionId, fuse: f32) -> Veto<()> {
        Veto::Allow
    }
    fn on_grenade_thrown(&mut self, session: SessionId, handle: GrenadeHandle) {}
    fn on_block_build_attempt(&mut self, session: SessionId, x: i32, y: i32, z: i32) -> Veto<()> {
        Veto::Allow
    }
    fn on_block_build(&mut self, session: SessionId, x: i32, y: i32, z: i32) {}
    fn on_block_destroy(&mut self, session: SessionId, x: i32, y: i32, z: i32, mode: u8) -> Veto<()> {
        Veto::Allow
    }
    fn on_block_removed(&mut self, x: i32, y: i32, z: i32) {}
    fn on_refill(&mut self, session: SessionId) -> Veto<()> {
        Veto::Allow
    }
    fn on_chat(&mut self, session: SessionId, message: &str, global: bool) -> Veto<String> {
        Veto::Allow
    }
    fn on_command(&mut self, session: SessionId, command: &str, args: &[String]) {}
    fn on_flag_take(&mut self, session: SessionId) {}
    fn on_flag_drop(&mut self, session: SessionId) {}
    fn on_flag_capture(&mut self, session: SessionId) {}
    fn on_game_end(&mut self, winner: Option<SessionId>) {}
    fn on_world_update(&mut self) {}
    fn on_reset(&mut self, session: SessionId) {}
}

/// No-op extension: every hook resolves to its default. Used when a
/// deployment doesn't need chat commands or plugins.
#[derive(Debug, Default)]
pub struct NoopExtension;

impl Extension for NoopExtension {}
