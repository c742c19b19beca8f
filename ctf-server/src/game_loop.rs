//! The fixed-interval world tick: entity settling,
//! grenade-explosion resolution, and respawn scheduling. Driven from
//! `main`/`server` by a `tokio::time::interval` at `update_frequency_hz`
//!; everything here is plain, synchronous state
//! mutation so it stays unit-testable without a runtime in scope.

use crate::collaborators::{FallImpact, GrenadeExplosion, Map, WorldKernel};
use crate::ctf_rules::GrenadeRegistry;
use crate::math::Vec3;
use crate::session::{Session, SessionHandle};
use crate::team::Team;

/// Re-grounds any flag not currently carried, so a flag left sitting
/// above a block that has since been dug out settles back onto the
/// terrain instead of floating. Carried
/// flags track their holder's position elsewhere and are untouched.
pub fn settle_entities(teams: &mut [Team; 2], map: &dyn Map) {
    for team in teams.iter_mut() {
        if team.flag.carrier.is_some() {
            continue;
        }
        let position = team.flag.position();
        let ground_z = map.get_z(position[0] as i32, position[1] as i32, 0) as f32;
        if ground_z != position[2] {
            team.flag.set_position([position[0], position[1], ground_z]);
        }
    }
}

/// One session hit by a grenade blast and the damage it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrenadeHit {
    pub target: SessionHandle,
    pub damage: i32,
}

/// Resolves which sessions a detonated grenade damages: the thrower
/// (self-damage) and every enemy of the thrower's team within blast
/// range, per the original `grenade_exploded()` — teammates other than
/// the thrower are never hit by a friendly grenade, regardless of the
/// friendly-fire config (that gate only applies to `HitPacket` damage).
pub fn resolve_grenade_damage(
    thrower: SessionHandle,
    sessions: &[(SessionHandle, Session)],
    world: &dyn WorldKernel,
    explosion: &GrenadeExplosion,
) -> Vec<GrenadeHit> {
    let thrower_team = sessions.iter().find(|(h, _)| *h == thrower).and_then(|(_, s)| s.team);

    sessions
        .iter()
        .filter_map(|(handle, session)| {
            if session.hp.is_none() {
                return None;
            }
            let is_thrower = *handle == thrower;
            if !is_thrower {
                if let (Some(a), Some(b)) = (thrower_team, session.team) {
                    if a == b {
                        return None;
                    }
                }
            }
            let character = session.character?;
            let position = world.character_position(character);
            let damage = world.grenade_damage(explosion.handle, position);
            (damage > 0).then_some(GrenadeHit { target: *handle, damage })
        })
        .collect()
}

/// Integer cell a grenade's explosion removes terrain around. Truncates
/// rather than rounds, matching the original's `int()` cast.
pub fn grenade_block_center(explosion_position: Vec3) -> (i32, i32, i32) {
    (explosion_position[0] as i32, explosion_position[1] as i32, explosion_position[2] as i32)
}

/// Clears the 3x3x3 cube of blocks centered on a grenade's resting
/// point.
pub fn apply_grenade_block_removal(center: (i32, i32, i32), map: &mut dyn Map) {
    let (cx, cy, cz) = center;
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                map.remove_point(cx + dx, cy + dy, cz + dz);
            }
        }
    }
}

/// Looks up and removes the registered thrower for a detonated grenade,
/// so the caller can run `session_fsm::perform_kill`/score-awarding
/// against whoever threw it.
pub fn take_grenade_thrower(registry: &mut GrenadeRegistry, explosion: &GrenadeExplosion) -> Option<SessionHandle> {
    registry.take_thrower(explosion.handle)
}

/// Finds the session a reported `FallImpact` belongs to, so the caller
/// can run the `on_fall` hook and apply damage against the right
/// `Session` (the kernel only knows its own `CharacterHandle`).
pub fn fall_impact_target(impact: &FallImpact, sessions: &[(SessionHandle, Session)]) -> Option<SessionHandle> {
    sessions
        .iter()
        .find(|(_, s)| s.character == Some(impact.character) && s.hp.is_some())
        .map(|(handle, _)| *handle)
}

/// A session whose respawn timer has elapsed and is ready to spawn in.
pub fn due_for_respawn(session: &Session, now: f64, respawn_time: f64) -> bool {
    session.respawn_pending
        && session
            .death_time
            .is_some_and(|death| now - death >= respawn_time)
}
