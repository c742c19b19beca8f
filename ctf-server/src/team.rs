//! Team scoring, spawn regions, and the Flag/Base entities.
//!
//! The original keeps a `Team.other` back-reference and builds `Flag`s
//! and `Base`s with a `protocol` back-reference of their own — a cycle
//! of the kind spec.md §9 calls out. Here `Team` is addressed by the
//! small `TeamId` enum and looked up through a two-element array owned
//! by the server; `Flag`/`Base` carry their owning `TeamId` instead of a
//! reference, so there is no cycle to manage.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::collaborators::Map;
use crate::math::Vec3;
use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TeamId {
    Blue = 0,
    Green = 1,
}

impl TeamId {
    pub fn other(self) -> TeamId {
        match self {
            TeamId::Blue => TeamId::Green,
            TeamId::Green => TeamId::Blue,
        }
    }

    pub fn from_index(i: u8) -> Option<TeamId> {
        match i {
            0 => Some(TeamId::Blue),
            1 => Some(TeamId::Green),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Tag identifying a Flag/Base entity on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityTag {
    BlueFlag = 0,
    GreenFlag = 1,
    BlueBase = 2,
    GreenBase = 3,
}

/// A 3-D point entity with an id tag, owned by a team.
#[derive(Debug, Clone, Copy)]
pub struct Entity {
    pub tag: EntityTag,
    pub team: TeamId,
    pub position: Vec3,
}

impl Entity {
    fn new(tag: EntityTag, team: TeamId, position: Vec3) -> Self {
        Self { tag, team, position }
    }
}

/// A capturable flag. Carries its own carrier rather than the session
/// carrying a flag reference, so picking up/dropping is a single-entity
/// mutation.
#[derive(Debug, Clone, Copy)]
pub struct Flag {
    pub entity: Entity,
    pub carrier: Option<SessionHandle>,
}

impl Flag {
    fn new(team: TeamId, position: Vec3) -> Self {
        let tag = match team {
            TeamId::Blue => EntityTag::BlueFlag,
            TeamId::Green => EntityTag::GreenFlag,
        };
        Self {
            entity: Entity::new(tag, team, position),
            carrier: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.entity.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.entity.position = position;
    }

    /// A carried flag never gets a position broadcast — the carrier's
    /// own position updates cover it).
    pub fn should_broadcast_update(&self) -> bool {
        self.carrier.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Base {
    pub entity: Entity,
}

impl Base {
    fn new(team: TeamId, position: Vec3) -> Self {
        let tag = match team {
            TeamId::Blue => EntityTag::BlueBase,
            TeamId::Green => EntityTag::GreenBase,
        };
        Self {
            entity: Entity::new(tag, team, position),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.entity.position
    }
}

/// Per-team scoring, spawn region, flag, and base.
#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub score: u32,
    pub kills: u32,
    pub flag: Flag,
    pub base: Base,
    /// Ground cells within the team's spawn rectangle, computed once per
    /// `initialize()` from the map: for Blue, x in [0,128),
    /// y in [128,384), ground z < 63; for Green, x in [384,512), same y.
    pub spawns: Vec<(i32, i32)>,
}

impl Team {
    /// Builds a team and runs its first `initialize()` against `map`.
    pub fn new(id: TeamId, map: &dyn Map) -> Self {
        let mut team = Team {
            id,
            score: 0,
            kills: 0,
            flag: Flag::new(id, [0.0, 0.0, 0.0]),
            base: Base::new(id, [0.0, 0.0, 0.0]),
            spawns: Vec::new(),
        };
        team.initialize(map);
        team
    }

    /// Recomputes spawns from the map and recreates the flag and base at
    /// fresh random spawn locations, resetting score and kills to zero.
    /// Called on map load, game reset, and game end.
    pub fn initialize(&mut self, map: &dyn Map) {
        self.score = 0;
        self.kills = 0;
        self.spawns = compute_spawns(self.id, map);
        let flag_pos = self.random_ground_location(map);
        let base_pos = self.random_ground_location(map);
        self.flag = Flag::new(self.id, flag_pos);
        self.base = Base::new(self.id, base_pos);
    }

    /// Recreates just the flag at a fresh random spawn location, leaving
    /// score/kills/base untouched. Called after a capture to return the
    /// captured flag to play.
    pub fn reset_flag(&mut self, map: &dyn Map) {
        let position = self.random_ground_location(map);
        self.flag = Flag::new(self.id, position);
    }

    /// Picks a random spawn cell from the precomputed ground list,
    /// falling back to a uniform-random column within the team's
    /// quadrant (with the map's ground height) if no ground cell was
    /// found at initialize time.
    pub fn random_ground_location(&self, map: &dyn Map) -> Vec3 {
        let mut rng = rand::thread_rng();
        if let Some(&(x, y)) = self.spawns.choose(&mut rng) {
            let z = map.get_z(x, y, 0);
            return [x as f32, y as f32, z as f32];
        }
        let x_offset = self.id.index() as i32 * 384;
        let x = x_offset + rng.gen_range(0..128);
        let y = 128 + rng.gen_range(0..256);
        let z = map.get_z(x, y, 0);
        [x as f32, y as f32, z as f32]
    }
}

fn compute_spawns(id: TeamId, map: &dyn Map) -> Vec<(i32, i32)> {
    let x_offset = id.index() as i32 * 384;
    let mut spawns = Vec::new();
    for x in x_offset..(x_offset + 128) {
        for y in 128..384 {
            let z = map.get_z(x, y, 0);
            if z < 63 {
                spawns.push((x, y));
            }
        }
    }
    spawns
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn blue_and_green_spawn_rectangles_do_not_overlap() {
        let map = FlatMap;
        let blue = compute_spawns(TeamId::Blue, &map);
        let green = compute_spawns(TeamId::Green, &map);
        assert!(blue.iter().all(|&(x, _)| (0..128).contains(&x)));
        assert!(green.iter().all(|&(x, _)| (384..512).contains(&x)));
    }

    #[test]
    fn initialize_resets_score_and_kills() {
        let map = FlatMap;
        let mut team = Team::new(TeamId::Blue, &map);
        team.score = 5;
        team.kills = 3;
        team.initialize(&map);
        assert_eq!(team.score, 0);
        assert_eq!(team.kills, 0);
    }

    #[test]
    fn flag_update_is_a_no_op_while_carried() {
        let map = FlatMap;
        let mut team = Team::new(TeamId::Blue, &map);
        assert!(team.flag.should_broadcast_update());
        team.flag.carrier = Some(SessionHandle(1));
        assert!(!team.flag.should_broadcast_update());
    }
}
