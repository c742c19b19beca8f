//! Pickup, drop, capture, refill, respawn, damage, and kill. Each operation here is a pure mutation over `Team`/`Session`
//! state; the veto/notification hooks (`on_flag_take`, `on_refill`, ...)
//! and the broadcasts each mutation implies are the caller's job
//! (`session_fsm`/`game_loop`), matching how `input_validator` stays
//! free of I/O so it can be unit tested directly.

use std::collections::HashMap;

use crate::config::{Config, FriendlyFire};
use crate::constants::{STARTING_BLOCKS, STARTING_GRENADES, STARTING_HP};
use crate::collaborators::{GrenadeHandle, Map};
use crate::math::{aabb_unit_overlap, Vec3};
use crate::session::{Session, SessionHandle};
use crate::team::{Team, TeamId};

/// Side table from a live grenade to the session that threw it. The
/// original closes a per-grenade callback over `self` (the thrower); a
/// `WorldKernel::update()` that just reports exploded handles needs this
/// table to recover who `self` was.
#[derive(Debug, Default)]
pub struct GrenadeRegistry {
    thrower_of: HashMap<GrenadeHandle, SessionHandle>,
}

impl GrenadeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, grenade: GrenadeHandle, thrower: SessionHandle) {
        self.thrower_of.insert(grenade, thrower);
    }

    /// Removes and returns the thrower once the grenade detonates or is
    /// otherwise destroyed; `None` if the handle wasn't tracked (e.g. a
    /// grenade thrown by a session that has since disconnected).
    pub fn take_thrower(&mut self, grenade: GrenadeHandle) -> Option<SessionHandle> {
        self.thrower_of.remove(&grenade)
    }
}

/// Kill-type tag carried on the wire KillAction. Numeric
/// values are this port's own choice, matching the conventional ordering
/// for this protocol family; see DESIGN.md "Open Questions".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KillType {
    Weapon = 0,
    Headshot = 1,
    Melee = 2,
    Grenade = 3,
    Fall = 4,
    TeamChange = 5,
    ClassChange = 6,
}

/// Whether a hit should deal damage, given the victim/shooter team
/// relationship and the server's friendly-fire policy. Grounded in the
/// original `hit()`: friendly fire never applies between different
/// teams; when it's the same team, `Off` blocks it, `On` always applies
/// it, and `OnGrief` applies it only if the victim destroyed a block
/// within the last `friendly_fire_time` seconds (so only a recently
/// griefing teammate can be shot back at).
pub fn resolve_friendly_fire(victim: &Session, shooter_team: TeamId, config: &Config, now: f64) -> bool {
    if victim.team != Some(shooter_team) {
        return true;
    }
    match config.friendly_fire {
        FriendlyFire::On => true,
        FriendlyFire::Off => false,
        FriendlyFire::OnGrief => match victim.last_block_destroy {
            None => false,
            Some(last) => now - last < config.friendly_fire_time,
        },
    }
}

/// Applies `damage` to a living victim, clamping into `0..=100`. Returns
/// `true` if this hit brought hp to zero and the caller must run `kill`.
/// A no-op (returns `false`) against an already-dead victim.
pub fn apply_damage(victim: &mut Session, damage: i32) -> bool {
    let Some(current) = victim.hp else {
        return false;
    };
    let new_hp = Session::clamp_hp(current - damage);
    victim.hp = Some(new_hp);
    new_hp <= 0
}

/// Drops any flag carried by `holder`, snapping it to rest on the
/// ground directly below `holder_position`.
/// Returns the team whose flag was dropped and its new resting
/// position, or `None` if `holder` wasn't carrying anything.
pub fn drop_flag(
    holder: SessionHandle,
    teams: &mut [Team; 2],
    holder_position: Vec3,
    map: &dyn Map,
) -> Option<(TeamId, Vec3)> {
    for team in teams.iter_mut() {
        if team.flag.carrier != Some(holder) {
            continue;
        }
        let x = holder_position[0].floor() as i32;
        let y = holder_position[1].floor() as i32;
        let z_start = (holder_position[2].floor() as i32).max(0);
        let z = map.get_z(x, y, z_start);
        let rest = [x as f32, y as f32, z as f32];
        team.flag.set_position(rest);
        team.flag.carrier = None;
        return Some((team.id, rest));
    }
    None
}

/// Picks up the opposing team's flag if it's unowned and the holder's
/// position collides with it. Returns `true`
/// if the pickup happened.
pub fn try_take_flag(holder: SessionHandle, holder_position: Vec3, holder_team: TeamId, teams: &mut [Team; 2]) -> bool {
    let enemy = &mut teams[holder_team.other().index()];
    if enemy.flag.carrier.is_some() {
        return false;
    }
    if !aabb_unit_overlap(holder_position, enemy.flag.position()) {
        return false;
    }
    enemy.flag.carrier = Some(holder);
    true
}

/// Result of a capture attempt at the own base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// `holder` wasn't carrying the enemy flag; nothing happened.
    NotCarrying,
    /// Captured; `team_won` is set once `max_score` is reached, in which
    /// case the caller must run a full `reset_game` instead of the
    /// ordinary single-flag reset below.
    Captured { team_won: bool },
}

/// Captures the enemy flag once `holder` (carrying it) collides with
/// their own base. On an ordinary (non-winning)
/// capture this also resets the captured flag to a fresh spawn point,
/// mirroring the original's `other_team.set_flag()`.
pub fn try_capture(holder: SessionHandle, holder_team: TeamId, teams: &mut [Team; 2], max_score: u32, map: &dyn Map) -> CaptureOutcome {
    let enemy_index = holder_team.other().index();
    if teams[enemy_index].flag.carrier != Some(holder) {
        return CaptureOutcome::NotCarrying;
    }
    let own_index = holder_team.index();
    let team_won = max_score > 0 && teams[own_index].score + 1 >= max_score;
    if team_won {
        return CaptureOutcome::Captured { team_won: true };
    }
    teams[own_index].score += 1;
    teams[enemy_index].reset_flag(map);
    CaptureOutcome::Captured { team_won: false }
}

/// True if `holder_position` overlaps `holder`'s own base — the trigger
/// for both capture and refill checks.
pub fn at_own_base(holder_position: Vec3, holder_team: TeamId, teams: &[Team; 2]) -> bool {
    aabb_unit_overlap(holder_position, teams[holder_team.index()].base.position())
}

/// Reports whether a refill cooldown has elapsed and, if so, stamps
/// `last_refill` regardless of whether the caller's `on_refill` hook
/// ultimately vetoes the refill — matching the original, which updates
/// the timestamp unconditionally once due so a vetoed refill doesn't
/// retry every tick.
pub fn refill_due(session: &mut Session, now: f64, refill_interval: f64) -> bool {
    let due = session.last_refill.map_or(true, |last| now - last > refill_interval);
    if due {
        session.last_refill = Some(now);
    }
    due
}

/// Restores hp, grenades, and blocks to their full starting values.
pub fn apply_refill(session: &mut Session) {
    session.hp = Some(STARTING_HP);
    session.grenades = STARTING_GRENADES;
    session.blocks = STARTING_BLOCKS;
}

/// Resets both teams to fresh spawn state (new flags/bases, zeroed
/// score/kills) for a game-end reset. Session-side effects (hp=0 then respawn for every named
/// session) are the caller's responsibility since this layer doesn't
/// own the session slab.
pub fn reset_game(teams: &mut [Team; 2], map: &dyn Map) {
    for team in teams.iter_mut() {
        team.initialize(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    struct FlatMap;
    impl Map for FlatMap {
        fn get_color(&self, _x: i32, _y: i32, _z: i32) -> u32 {
            0
        }
        fn get_z(&self, _x: i32, _y: i32, _start: i32) -> i32 {
            10
        }
        fn get_solid(&self, _x: i32, _y: i32, z: i32) -> bool {
            z >= 10
        }
        fn set_point(&mut self, _x: i32, _y: i32, _z: i32, _rgba: (u8, u8, u8, u8)) -> bool {
            true
        }
        fn remove_point(&mut self, _x: i32, _y: i32, _z: i32) {}
        fn generate(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    fn teams() -> [Team; 2] {
        let map = FlatMap;
        [Team::new(TeamId::Blue, &map), Team::new(TeamId::Green, &map)]
    }

    fn new_session() -> Session {
        let mut s = Session::new("127.0.0.1:1".parse().unwrap(), 0, 0.0);
        s.player_id = Some(1);
        s.state = SessionState::InGame;
        s.hp = Some(100);
        s.team = Some(TeamId::Blue);
        s
    }

    #[test]
    fn friendly_fire_off_blocks_teammate_damage() {
        let victim = new_session();
        let config = Config { friendly_fire: FriendlyFire::Off, ..Config::default() };
        assert!(!resolve_friendly_fire(&victim, TeamId::Blue, &config, 0.0));
    }

    #[test]
    fn friendly_fire_never_blocks_cross_team_damage() {
        let mut victim = new_session();
        victim.team = Some(TeamId::Green);
        let config = Config { friendly_fire: FriendlyFire::Off, ..Config::default() };
        assert!(resolve_friendly_fire(&victim, TeamId::Blue, &config, 0.0));
    }

    #[test]
    fn on_grief_applies_only_after_recent_block_destroy() {
        let mut victim = new_session();
        victim.last_block_destroy = Some(10.0);
        let config = Config {
            friendly_fire: FriendlyFire::OnGrief,
            friendly_fire_time: 2.0,
            ..Config::default()
        };
        assert!(resolve_friendly_fire(&victim, TeamId::Blue, &config, 11.0));
        assert!(!resolve_friendly_fire(&victim, TeamId::Blue, &config, 20.0));
    }

    #[test]
    fn apply_damage_reports_kill_at_zero_hp() {
        let mut victim = new_session();
        assert!(!apply_damage(&mut victim, 40));
        assert_eq!(victim.hp, Some(60));
        assert!(apply_damage(&mut victim, 1000));
        assert_eq!(victim.hp, Some(0));
    }

    #[test]
    fn apply_damage_is_noop_on_dead_session() {
        let mut victim = new_session();
        victim.hp = None;
        assert!(!apply_damage(&mut victim, 10));
        assert_eq!(victim.hp, None);
    }

    #[test]
    fn take_flag_requires_collision_and_unowned_flag() {
        let mut teams = teams();
        let enemy_flag_pos = teams[1].flag.position();
        let far = [enemy_flag_pos[0] + 100.0, enemy_flag_pos[1], enemy_flag_pos[2]];
        assert!(!try_take_flag(SessionHandle(1), far, TeamId::Blue, &mut teams));
        assert!(try_take_flag(SessionHandle(1), enemy_flag_pos, TeamId::Blue, &mut teams));
        assert_eq!(teams[1].flag.carrier, Some(SessionHandle(1)));
        assert!(!try_take_flag(SessionHandle(2), enemy_flag_pos, TeamId::Blue, &mut teams));
    }

    #[test]
    fn capture_scores_and_resets_captured_flag_when_not_winning() {
        let mut teams = teams();
        teams[1].flag.carrier = Some(SessionHandle(1));
        let map = FlatMap;
        let outcome = try_capture(SessionHandle(1), TeamId::Blue, &mut teams, 10, &map);
        assert_eq!(outcome, CaptureOutcome::Captured { team_won: false });
        assert_eq!(teams[0].score, 1);
        assert_eq!(teams[1].flag.carrier, None);
    }

    #[test]
    fn capture_reports_win_without_mutating_score_when_max_score_reached() {
        let mut teams = teams();
        teams[0].score = 9;
        teams[1].flag.carrier = Some(SessionHandle(1));
        let map = FlatMap;
        let outcome = try_capture(SessionHandle(1), TeamId::Blue, &mut teams, 10, &map);
        assert_eq!(outcome, CaptureOutcome::Captured { team_won: true });
        assert_eq!(teams[0].score, 9);
    }

    #[test]
    fn drop_flag_snaps_to_ground_below_holder() {
        let mut teams = teams();
        teams[1].flag.carrier = Some(SessionHandle(1));
        let map = FlatMap;
        let dropped = drop_flag(SessionHandle(1), &mut teams, [12.7, 30.2, 15.9], &map);
        assert_eq!(dropped, Some((TeamId::Green, [12.0, 30.0, 10.0])));
        assert_eq!(teams[1].flag.carrier, None);
    }

    #[test]
    fn grenade_registry_returns_thrower_once() {
        let mut registry = GrenadeRegistry::new();
        registry.register(GrenadeHandle(1), SessionHandle(7));
        assert_eq!(registry.take_thrower(GrenadeHandle(1)), Some(SessionHandle(7)));
        assert_eq!(registry.take_thrower(GrenadeHandle(1)), None);
    }

    #[test]
    fn refill_due_stamps_timestamp_even_once() {
        let mut session = new_session();
        assert!(refill_due(&mut session, 100.0, 20.0));
        assert!(!refill_due(&mut session, 110.0, 20.0));
        assert!(refill_due(&mut session, 121.0, 20.0));
    }
}
