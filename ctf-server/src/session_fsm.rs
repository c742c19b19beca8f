//! The session state machine: handshake accept/reject,
//! the join-window name/team negotiation, and the in-game dispatch
//! logic for each contained loader. Kept in the same pure-function style
//! as [`crate::input_validator`] and [`crate::ctf_rules`] — every
//! function takes exactly the collaborators it needs and returns an
//! outcome the caller (the not-yet-reached `GameServer`) turns into
//! broadcasts and hook calls.

use ctf_common::{uniquify_name, BlockActionKind, MultiKeyIndex, Veto};

use crate::collaborators::{Map, WorldKernel};
use crate::config::Config;
use crate::constants::{
    BEDROCK_Z, HIT_VALUES, MIN_BLOCK_BUDGET, STARTING_BLOCKS, STARTING_GRENADES, STARTING_HP,
    TOOL_INTERVAL_SECS, WEAPON_INTERVAL_SECS,
};
use crate::ctf_rules::{at_own_base, drop_flag, refill_due, try_capture, try_take_flag, CaptureOutcome, KillType};
use crate::input_validator::check_rapid_fire;
use crate::math::Vec3;
use crate::session::{Session, SessionHandle, Tool, Weapon};
use crate::team::{Team, TeamId};

/// Why a handshake was refused. All three produce the same wire effect
/// (no ConnectionResponse, session torn down) — kept distinct only for
/// the `tracing` event the caller logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    VersionMismatch,
    ServerFull,
    PerIpCapExceeded,
}

/// Validates a ConnectionRequest against protocol version, the
/// server-wide connection cap (capped at 32 regardless of a higher
/// configured `max_players`), and the optional per-ip cap.
/// `connections_including_this_one` and `same_ip_connections` are counts
/// the caller derives from its connection table.
pub fn check_handshake(
    client_version: i32,
    expected_version: i32,
    connections_including_this_one: usize,
    same_ip_connections: usize,
    config: &Config,
) -> Result<(), RejectReason> {
    if client_version != expected_version {
        return Err(RejectReason::VersionMismatch);
    }
    let max_players = (config.max_players as usize).min(32);
    if connections_including_this_one > max_players {
        return Err(RejectReason::ServerFull);
    }
    if config.max_connections_per_ip > 0 && same_ip_connections > config.max_connections_per_ip as usize {
        return Err(RejectReason::PerIpCapExceeded);
    }
    Ok(())
}

/// Applies the `on_team_join` veto/substitute result: allowed joins the
/// requested team, a plain deny flips to the opposite team (matching
/// the original, which never refuses the connection over a team veto),
/// and a substitution joins whatever team the hook names.
pub fn resolve_team_join(requested: TeamId, veto: Veto<TeamId>) -> TeamId {
    match veto {
        Veto::Allow => requested,
        Veto::Deny => requested.other(),
        Veto::Substitute(team) => team,
    }
}

/// Resolves the unique, case-insensitive session name for a join,
/// including the vanilla `Deuce` special case.
pub fn resolve_join_name(requested: &str, player_id: u32, index: &MultiKeyIndex<SessionHandle>) -> String {
    uniquify_name(index, requested, player_id)
}

/// Ground spawn point for a fresh or respawning character: a random
/// team spawn cell one unit below the ground surface, matching the
/// original's `z -= 1` adjustment on an auto-picked location.
pub fn pick_spawn_position(team: &Team, map: &dyn Map) -> Vec3 {
    let mut position = team.random_ground_location(map);
    position[2] -= 1.0;
    position
}

/// Resets hp/tool/grenades/blocks to the spawn defaults.
pub fn apply_spawn_loadout(session: &mut Session) {
    session.hp = Some(STARTING_HP);
    session.tool = Tool::Weapon;
    session.grenades = STARTING_GRENADES;
    session.blocks = STARTING_BLOCKS;
    session.respawn_pending = false;
}

/// Minimum interval between BlockAction packets for the session's
/// current tool, using the per-weapon table while the weapon tool is
/// selected.
pub fn tool_interval_secs(tool: Tool, weapon: Weapon) -> f64 {
    match tool {
        Tool::Weapon => WEAPON_INTERVAL_SECS[weapon as usize],
        other => TOOL_INTERVAL_SECS[other as usize],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockRateOutcome {
    Ok,
    RateLimited { hack_detected: bool },
}

/// Updates `last_block` unconditionally and reports whether this action
/// violated the tool's minimum interval; a violation also feeds the
/// rapid-fire window.
pub fn check_block_rate(session: &mut Session, now: f64) -> BlockRateOutcome {
    let interval = tool_interval_secs(session.tool, session.weapon);
    let limited = session.last_block.is_some_and(|last| now - last < interval);
    session.last_block = Some(now);
    if limited {
        let hack_detected = check_rapid_fire(&mut session.rapids, now);
        BlockRateOutcome::RateLimited { hack_detected }
    } else {
        BlockRateOutcome::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockActionOutcome {
    /// Bedrock layer or an over-drawn block budget; no map mutation.
    Rejected,
    Applied,
}

/// Applies a validated BlockAction to the map and the session's block
/// budget. Rate limiting, the bedrock check,
/// and `on_block_build_attempt`/`on_block_destroy` vetoes are the
/// caller's responsibility — this only performs the mutation once all
/// of those have already passed.
pub fn apply_block_action(
    session: &mut Session,
    kind: BlockActionKind,
    x: i32,
    y: i32,
    z: i32,
    map: &mut dyn Map,
    now: f64,
) -> BlockActionOutcome {
    if z >= BEDROCK_Z {
        return BlockActionOutcome::Rejected;
    }
    match kind {
        BlockActionKind::Build => {
            session.blocks -= 1;
            if session.blocks < MIN_BLOCK_BUDGET {
                return BlockActionOutcome::Rejected;
            }
            let color = (session.color.0, session.color.1, session.color.2, 255);
            if !map.set_point(x, y, z, color) {
                return BlockActionOutcome::Rejected;
            }
            BlockActionOutcome::Applied
        }
        BlockActionKind::Destroy => {
            session.blocks += 1;
            map.remove_point(x, y, z);
            session.last_block_destroy = Some(now);
            BlockActionOutcome::Applied
        }
        BlockActionKind::SpadeDestroy => {
            map.remove_point(x, y, z);
            map.remove_point(x, y, z + 1);
            map.remove_point(x, y, z - 1);
            session.last_block_destroy = Some(now);
            BlockActionOutcome::Applied
        }
        BlockActionKind::GrenadeDestroy => {
            // Only ever reached server-side via grenade explosion
            // (`game_loop`), never a legitimate client BlockAction; a
            // client sending this value mutates nothing, matching the
            // original's unhandled fallthrough.
            BlockActionOutcome::Applied
        }
    }
}

/// Damage dealt by `weapon` against hit `zone` (0=torso, 1=head, 2=arms,
/// 3=legs per spec.md §4.1 HitPacket), or `None` for an out-of-range
/// zone byte.
pub fn hit_amount(weapon: Weapon, zone: u8) -> Option<i32> {
    HIT_VALUES.get(weapon as usize)?.get(zone as usize).copied()
}

pub fn can_throw_grenade(session: &Session) -> bool {
    session.grenades > 0
}

pub fn consume_grenade(session: &mut Session) {
    session.grenades = session.grenades.saturating_sub(1);
}

/// Splits a ChatMessage leading `/` into a command and its whitespace
/// separated arguments, for the `on_command` hook. Chat
/// commands themselves are Extension/plugin territory; this is just the
/// parsing boundary.
pub fn parse_command(message: &str) -> Option<(String, Vec<String>)> {
    let rest = message.strip_prefix('/')?;
    let mut parts = shell_split(rest).into_iter();
    let command = parts.next()?;
    let args = parts.collect();
    Some((command, args))
}

/// Minimal shell-style word split: honors single and double quotes so a
/// quoted argument may contain spaces, matching `shlex.split` in the
/// original. Unterminated quotes take the rest of the line as one word.
fn shell_split(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Outcome of an accepted-or-rejected PositionData update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdateOutcome {
    /// `Some(authoritative)` means the move was rubber-banded: the
    /// caller must resend `authoritative` and must not apply any of the
    /// base/flag side effects below.
    pub rubber_banded: Option<Vec3>,
    pub captured: Option<CaptureOutcome>,
    pub refill_due: bool,
    pub picked_up_flag: bool,
}

/// Applies an already NaN-checked PositionData: rubber-band check,
/// authoritative position write-through, and the base/flag collision
/// side effects (capture, refill due-check, pickup). Mirrors the
/// original's single PositionData branch.
pub fn handle_position_update(
    handle: SessionHandle,
    session: &mut Session,
    world: &mut dyn WorldKernel,
    reported: Vec3,
    config: &Config,
    teams: &mut [Team; 2],
    map: &dyn Map,
    now: f64,
) -> PositionUpdateOutcome {
    use crate::input_validator::{check_rubber_band, PositionCheck};

    let character = session.character.expect("position update requires a spawned character");
    let current = world.character_position(character);
    if let PositionCheck::Reject { authoritative } = check_rubber_band(current, reported, config.speedhack_detect) {
        return PositionUpdateOutcome {
            rubber_banded: Some(authoritative),
            captured: None,
            refill_due: false,
            picked_up_flag: false,
        };
    }

    world.set_character_position(character, reported, false);

    let mut captured = None;
    let mut refill_is_due = false;
    if let Some(team) = session.team {
        if at_own_base(reported, team, teams) {
            let outcome = try_capture(handle, team, teams, config.max_score, map);
            if outcome != CaptureOutcome::NotCarrying {
                captured = Some(outcome);
            }
            refill_is_due = refill_due(session, now, config.refill_interval);
        }
    }

    let picked_up_flag = session
        .team
        .map(|team| try_take_flag(handle, reported, team, teams))
        .unwrap_or(false);

    PositionUpdateOutcome {
        rubber_banded: None,
        captured,
        refill_due: refill_is_due,
        picked_up_flag,
    }
}

/// What put a session's hp to zero, or the two non-damage kill triggers
///.
#[derive(Debug, Clone, Copy)]
pub enum KillCause {
    Weapon(SessionHandle),
    Headshot(SessionHandle),
    Melee(SessionHandle),
    Grenade(SessionHandle),
    Fall,
    TeamChange,
    ClassChange,
}

/// Everything the caller needs to finish sequencing a kill: the
/// broadcastable kill type/killer pair and where the victim's flag (if
/// any) came to rest.
#[derive(Debug, Clone, Copy)]
pub struct KillResult {
    pub kill_type: KillType,
    pub killer: Option<SessionHandle>,
    pub dropped_flag: Option<(TeamId, Vec3)>,
}

/// Runs the kill sequence once a victim's hp has reached zero (or a
/// team/weapon change has killed them outright): drops any carried
/// flag at the victim's last known world position, marks the victim
/// dead and due for respawn, and reports what happened. Awarding the killer's score and broadcasting the KillAction
/// are the caller's job — this only has the victim's `Session`, not the
/// full slab the killer's `Session` lives in.
pub fn perform_kill(
    victim_handle: SessionHandle,
    victim: &mut Session,
    cause: KillCause,
    world: &dyn WorldKernel,
    teams: &mut [Team; 2],
    map: &dyn Map,
    now: f64,
) -> KillResult {
    let position = victim
        .character
        .map(|character| world.character_position(character))
        .unwrap_or(crate::math::VEC3_ORIGIN);
    let dropped_flag = drop_flag(victim_handle, teams, position, map);
    victim.hp = None;
    victim.respawn_pending = true;
    victim.death_time = Some(now);

    let (kill_type, killer) = match cause {
        KillCause::Weapon(by) => (KillType::Weapon, Some(by)),
        KillCause::Headshot(by) => (KillType::Headshot, Some(by)),
        KillCause::Melee(by) => (KillType::Melee, Some(by)),
        KillCause::Grenade(by) => (KillType::Grenade, Some(by)),
        KillCause::Fall => (KillType::Fall, None),
        KillCause::TeamChange => (KillType::TeamChange, None),
        KillCause::ClassChange => (KillType::ClassChange, None),
    };

    KillResult { kill_type, killer, dropped_flag }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn handshake_rejects_version_mismatch_before_capacity() {
        let result = check_handshake(2, 3, 100, 0, &config());
        assert_eq!(result, Err(RejectReason::VersionMismatch));
    }

    #[test]
    fn handshake_rejects_over_capacity() {
        let mut cfg = config();
        cfg.max_players = 2;
        assert_eq!(check_handshake(3, 3, 3, 0, &cfg), Err(RejectReason::ServerFull));
        assert_eq!(check_handshake(3, 3, 2, 0, &cfg), Ok(()));
    }

    #[test]
    fn handshake_rejects_per_ip_cap() {
        let mut cfg = config();
        cfg.max_connections_per_ip = 1;
        assert_eq!(check_handshake(3, 3, 5, 2, &cfg), Err(RejectReason::PerIpCapExceeded));
        assert_eq!(check_handshake(3, 3, 5, 1, &cfg), Ok(()));
    }

    #[test]
    fn team_join_veto_flips_to_opposite_team() {
        assert_eq!(resolve_team_join(TeamId::Blue, Veto::Deny), TeamId::Green);
        assert_eq!(resolve_team_join(TeamId::Blue, Veto::Allow), TeamId::Blue);
        assert_eq!(resolve_team_join(TeamId::Blue, Veto::Substitute(TeamId::Green)), TeamId::Green);
    }

    #[test]
    fn block_rate_flags_violations_but_always_stamps_last_block() {
        let mut session = Session::new("127.0.0.1:1".parse().unwrap(), 0, 0.0);
        session.state = SessionState::InGame;
        assert_eq!(check_block_rate(&mut session, 0.0), BlockRateOutcome::Ok);
        assert!(matches!(check_block_rate(&mut session, 0.1), BlockRateOutcome::RateLimited { .. }));
        assert_eq!(session.last_block, Some(0.1));
    }

    #[test]
    fn block_budget_cannot_go_below_minimum() {
        struct NullMap;
        impl Map for NullMap {
            fn get_color(&self, _x: i32, _y: i32, _z: i32) -> u32 {
                0
            }
            fn get_z(&self, _x: i32, _y: i32, _start: i32) -> i32 {
                0
            }
            fn get_solid(&self, _x: i32, _y: i32, _z: i32) -> bool {
                false
            }
            fn set_point(&mut self, _x: i32, _y: i32, _z: i32, _rgba: (u8, u8, u8, u8)) -> bool {
                true
            }
            fn remove_point(&mut self, _x: i32, _y: i32, _z: i32) {}
            fn generate(&self) -> Vec<u8> {
                Vec::new()
            }
        }
        let mut session = Session::new("127.0.0.1:1".parse().unwrap(), 0, 0.0);
        session.blocks = MIN_BLOCK_BUDGET + 1;
        let mut map = NullMap;
        assert_eq!(
            apply_block_action(&mut session, BlockActionKind::Build, 0, 0, 0, &mut map, 0.0),
            BlockActionOutcome::Applied
        );
        assert_eq!(session.blocks, MIN_BLOCK_BUDGET);
        assert_eq!(
            apply_block_action(&mut session, BlockActionKind::Build, 0, 0, 0, &mut map, 0.0),
            BlockActionOutcome::Rejected
        );
    }

    #[test]
    fn bedrock_layer_rejects_any_block_action() {
        struct NullMap;
        impl Map for NullMap {
            fn get_color(&self, _x: i32, _y: i32, _z: i32) -> u32 {
                0
            }
            fn get_z(&self, _x: i32, _y: i32, _start: i32) -> i32 {
                0
            }
            fn get_solid(&self, _x: i32, _y: i32, _z: i32) -> bool {
                false
            }
            fn set_point(&mut self, _x: i32, _y: i32, _z: i32, _rgba: (u8, u8, u8, u8)) -> bool {
                true
            }
            fn remove_point(&mut self, _x: i32, _y: i32, _z: i32) {}
            fn generate(&self) -> Vec<u8> {
                Vec::new()
            }
        }
        let mut session = Session::new("127.0.0.1:1".parse().unwrap(), 0, 0.0);
        let mut map = NullMap;
        assert_eq!(
            apply_block_action(&mut session, BlockActionKind::Destroy, 0, 0, BEDROCK_Z, &mut map, 0.0),
            BlockActionOutcome::Rejected
        );
    }

    #[test]
    fn hit_amount_looks_up_weapon_and_zone() {
        assert_eq!(hit_amount(Weapon::Rifle, 1), Some(100));
        assert_eq!(hit_amount(Weapon::Shotgun, 9), None);
    }

    #[test]
    fn parse_command_splits_leading_slash() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(
            parse_command("/kick griefer reason"),
            Some(("kick".to_string(), vec!["griefer".to_string(), "reason".to_string()]))
        );
    }

    #[test]
    fn parse_command_honors_quoted_arguments() {
        assert_eq!(
            parse_command("/ban griefer \"being a jerk\""),
            Some(("ban".to_string(), vec!["griefer".to_string(), "being a jerk".to_string()]))
        );
    }

    #[test]
    fn perform_kill_drops_carried_flag_and_marks_victim_dead() {
        use crate::collaborators::{CharacterHandle, GrenadeExplosion, GrenadeHandle};

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

        struct StubWorld;
        impl WorldKernel for StubWorld {
            fn create_character(&mut self, _position: Vec3) -> CharacterHandle {
                CharacterHandle(0)
            }
            fn destroy_character(&mut self, _handle: CharacterHandle) {}
            fn character_position(&self, _handle: CharacterHandle) -> Vec3 {
                [12.7, 30.2, 15.9]
            }
            fn character_orientation(&self, _handle: CharacterHandle) -> Vec3 {
                [0.0, 0.0, 0.0]
            }
            fn character_acceleration(&self, _handle: CharacterHandle) -> Vec3 {
                [0.0, 0.0, 0.0]
            }
            fn character_dead(&self, _handle: CharacterHandle) -> bool {
                false
            }
            fn set_character_position(&mut self, _handle: CharacterHandle, _pos: Vec3, _teleport: bool) {}
            fn set_character_orientation(&mut self, _handle: CharacterHandle, _orientation: Vec3) {}
            fn set_character_walk(&mut self, _handle: CharacterHandle, _up: bool, _down: bool, _left: bool, _right: bool) {}
            fn set_character_animation(&mut self, _handle: CharacterHandle, _fire: bool, _jump: bool, _crouch: bool, _aim: bool) {}
            fn set_character_dead(&mut self, _handle: CharacterHandle, _dead: bool) {}
            fn get_hit_direction(&self, _handle: CharacterHandle, _from: Vec3) -> u8 {
                0
            }
            fn create_grenade(&mut self, _position: Vec3, _velocity: Vec3, _fuse: f64) -> GrenadeHandle {
                GrenadeHandle(0)
            }
            fn destroy_grenade(&mut self, _handle: GrenadeHandle) {}
            fn grenade_position(&self, _handle: GrenadeHandle) -> Vec3 {
                [0.0, 0.0, 0.0]
            }
            fn grenade_damage(&self, _handle: GrenadeHandle, _point: Vec3) -> i32 {
                0
            }
            fn update(&mut self, _dt: f64) -> Vec<GrenadeExplosion> {
                Vec::new()
            }
        }

        let map = FlatMap;
        let mut teams = [Team::new(TeamId::Blue, &map), Team::new(TeamId::Green, &map)];
        teams[1].flag.carrier = Some(SessionHandle(1));
        let world = StubWorld;
        let mut victim = Session::new("127.0.0.1:1".parse().unwrap(), 0, 0.0);
        victim.character = Some(CharacterHandle(0));
        victim.hp = Some(40);

        let result = perform_kill(SessionHandle(1), &mut victim, KillCause::Weapon(SessionHandle(2)), &world, &mut teams, &map, 42.0);

        assert_eq!(result.kill_type, KillType::Weapon);
        assert_eq!(result.killer, Some(SessionHandle(2)));
        assert_eq!(result.dropped_flag, Some((TeamId::Green, [12.0, 30.0, 10.0])));
        assert_eq!(victim.hp, None);
        assert!(victim.respawn_pending);
        assert_eq!(victim.death_time, Some(42.0));
        assert_eq!(teams[1].flag.carrier, None);
    }
}
