//! Per-connection session state and the handshake ->
//! join-window -> in-game -> closed state machine it moves through
//!.

use std::net::SocketAddr;

use ctf_common::SlidingWindow;

use crate::collaborators::CharacterHandle;
use crate::constants::{RAPID_WINDOW_ENTRIES, TIMER_WINDOW_ENTRIES};
use crate::team::TeamId;

/// Arena index into the server's session slab. Never reused while the
/// slot it names is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshake,
    JoinWindow,
    InGame,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Weapon {
    Rifle = 0,
    Smg = 1,
    Shotgun = 2,
}

impl Weapon {
    pub fn from_byte(b: u8) -> Option<Weapon> {
        match b {
            0 => Some(Weapon::Rifle),
            1 => Some(Weapon::Smg),
            2 => Some(Weapon::Shotgun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tool {
    Spade = 0,
    Block = 1,
    Weapon = 2,
    Grenade = 3,
}

impl Tool {
    pub fn from_byte(b: u8) -> Option<Tool> {
        match b {
            0 => Some(Tool::Spade),
            1 => Some(Tool::Block),
            2 => Some(Tool::Weapon),
            3 => Some(Tool::Grenade),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Boolean session flags, grouped so they can be
    /// copied/compared in one shot instead of five separate bools.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SessionFlags: u8 {
        const FILTER_VISIBILITY_DATA = 0b0000_0001;
        const SPEEDHACK_DETECT       = 0b0000_0010;
        const FLY                    = 0b0000_0100;
        const DEAF                   = 0b0000_1000;
        const MASTER                 = 0b0001_0000;
    }
}

/// Per-connection state. See spec.md §3 for the full invariant list;
/// enforcement of those invariants lives in `session_fsm` and
/// `ctf_rules`, not here — this struct is a plain bag of fields.
#[derive(Debug)]
pub struct Session {
    pub addr: SocketAddr,
    pub state: SessionState,
    pub connection_id: u32,
    pub player_id: Option<u32>,
    pub name: Option<String>,
    pub team: Option<TeamId>,
    pub weapon: Weapon,
    pub tool: Tool,
    pub color: (u8, u8, u8),
    /// `None` means dead; otherwise in `0..=100`.
    pub hp: Option<i32>,
    pub grenades: u8,
    pub blocks: i32,
    pub kills: u32,
    pub character: Option<CharacterHandle>,
    pub orientation_sequence: u16,
    pub last_refill: Option<f64>,
    pub last_block: Option<f64>,
    pub last_block_destroy: Option<f64>,
    /// Non-null iff `state == JoinWindow`; drained and nulled on entry
    /// to `InGame`.
    pub saved_loaders: Option<Vec<Vec<u8>>>,
    pub timers: SlidingWindow,
    pub rapids: SlidingWindow,
    pub flags: SessionFlags,
    pub respawn_pending: bool,
    /// Set when hp reaches zero; `game_loop` respawns the session once
    /// `respawn_time` seconds have elapsed since this stamp.
    pub death_time: Option<f64>,
    pub connect_time: f64,
}

impl Session {
    pub fn new(addr: SocketAddr, connection_id: u32, now: f64) -> Self {
        Self {
            addr,
            state: SessionState::Handshake,
            connection_id,
            player_id: None,
            name: None,
            team: None,
            weapon: Weapon::Rifle,
            tool: Tool::Spade,
            color: (0x70, 0x70, 0x70),
            hp: None,
            grenades: 0,
            blocks: 0,
            kills: 0,
            character: None,
            orientation_sequence: 0,
            last_refill: None,
            last_block: None,
            last_block_destroy: None,
            saved_loaders: None,
            timers: SlidingWindow::new(TIMER_WINDOW_ENTRIES),
            rapids: SlidingWindow::new(RAPID_WINDOW_ENTRIES),
            flags: SessionFlags::empty(),
            respawn_pending: false,
            death_time: None,
            connect_time: now,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp.is_some()
    }

    pub fn next_orientation_sequence(&mut self) -> u16 {
        let seq = self.orientation_sequence;
        self.orientation_sequence = seq.wrapping_add(1);
        seq
    }

    /// Kills have a transient hp=0 moment that must immediately trigger
    /// kill(); this just clamps into range.
    pub fn clamp_hp(value: i32) -> i32 {
        value.clamp(0, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_sequence_wraps_at_16_bits() {
        let mut s = Session::new("127.0.0.1:1000".parse().unwrap(), 0, 0.0);
        s.orientation_sequence = u16::MAX;
        assert_eq!(s.next_orientation_sequence(), u16::MAX);
        assert_eq!(s.orientation_sequence, 0);
    }
}
