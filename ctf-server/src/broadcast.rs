//! Selective broadcast fabric: best-effort and sequenced
//! (distance-filtered, per-recipient sequence-stamped) fan-out of
//! contained loaders, with the save-flagged saved-loader queue for
//! sessions still inside the join window.

use ctf_common::LoaderId;

use crate::collaborators::{Transport, WorldKernel};
use crate::constants::ORIENTATION_DISTANCE_SQUARED;
use crate::session::{Session, SessionHandle, SessionState};
use crate::team::TeamId;

/// Ground-plane distance only, matching the original orientation-culling
/// check — it never looks at the z axis.
fn distance_squared_xy(a: crate::math::Vec3, b: crate::math::Vec3) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// One outbound contained-loader payload plus the envelope choice it
/// needs (best-effort `SizedData` vs. distance-filtered, sequence
/// stamped `SizedSequenceData`).
pub struct Broadcast<'a> {
    pub contained_payload: &'a [u8],
    pub sender: Option<SessionHandle>,
    pub team_filter: Option<TeamId>,
    pub sequenced: bool,
    pub save: bool,
}

fn build_envelope(sequenced: bool, sequence: u16, contained_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contained_payload.len() + 3);
    if sequenced {
        out.push(LoaderId::SizedSequenceData as u8);
        out.extend_from_slice(&sequence.to_le_bytes());
    } else {
        out.push(LoaderId::SizedData as u8);
    }
    out.extend_from_slice(contained_payload);
    out
}

/// Fans `broadcast.contained_payload` out to every eligible recipient in
/// `sessions`, per the selective rules in spec.md §4.4:
/// - skip the sender (if any) and any session without a player-id.
/// - apply the team filter when set.
/// - in sequenced mode with a positioned sender, skip recipients whose
///   character is farther than `ORIENTATION_DISTANCE`; otherwise stamp
///   the recipient's own next orientation sequence number.
/// - a recipient mid-join-window only receives the payload if `save` is
///   set, and then only into its saved-loader queue — never live.
pub fn dispatch(
    sessions: &mut [(SessionHandle, Session)],
    world: &dyn WorldKernel,
    transport: &mut dyn Transport,
    broadcast: &Broadcast,
) {
    let sender_position = broadcast.sender.and_then(|sender_handle| {
        sessions
            .iter()
            .find(|(h, _)| *h == sender_handle)
            .and_then(|(_, s)| s.character)
            .map(|c| world.character_position(c))
    });

    for (handle, session) in sessions.iter_mut() {
        if Some(*handle) == broadcast.sender {
            continue;
        }
        if session.player_id.is_none() {
            continue;
        }
        if let Some(team) = broadcast.team_filter {
            if session.team != Some(team) {
                continue;
            }
        }

        if session.state == SessionState::JoinWindow {
            if broadcast.save {
                session
                    .saved_loaders
                    .get_or_insert_with(Vec::new)
                    .push(broadcast.contained_payload.to_vec());
            }
            continue;
        }

        let sequence = if broadcast.sequenced {
            if let Some(sender_pos) = sender_position {
                if let Some(character) = session.character {
                    let recipient_pos = world.character_position(character);
                    if distance_squared_xy(sender_pos, recipient_pos) > ORIENTATION_DISTANCE_SQUARED {
                        continue;
                    }
                }
            }
            session.next_orientation_sequence()
        } else {
            0
        };

        let envelope = build_envelope(broadcast.sequenced, sequence, broadcast.contained_payload);
        transport.send(&envelope, session.addr);
    }
}

/// Drains a session's saved-loader queue in order through the reliable
/// path and nulls the queue, called on entry to `InGame`.
pub fn drain_saved_loaders(session: &mut Session, transport: &mut dyn Transport) {
    if let Some(queue) = session.saved_loaders.take() {
        for payload in queue {
            let envelope = build_envelope(false, 0, &payload);
            transport.send(&envelope, session.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CharacterHandle, GrenadeExplosion, GrenadeHandle};
    use crate::session::SessionState;
    use std::net::SocketAddr;

    struct RecordingTransport {
        sent: Vec<(Vec<u8>, SocketAddr)>,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, bytes: &[u8], addr: SocketAddr) {
            self.sent.push((bytes.to_vec(), addr));
        }
    }

    struct StubWorld;
    impl WorldKernel for StubWorld {
        fn create_character(&mut self, _position: crate::math::Vec3) -> CharacterHandle {
            CharacterHandle(0)
        }
        fn destroy_character(&mut self, _handle: CharacterHandle) {}
        fn character_position(&self, handle: CharacterHandle) -> crate::math::Vec3 {
            [handle.0 as f32 * 200.0, 0.0, 0.0]
        }
        fn character_orientation(&self, _handle: CharacterHandle) -> crate::math::Vec3 {
            [0.0, 0.0, 0.0]
        }
        fn character_acceleration(&self, _handle: CharacterHandle) -> crate::math::Vec3 {
            [0.0, 0.0, 0.0]
        }
        fn character_dead(&self, _handle: CharacterHandle) -> bool {
            false
        }
        fn set_character_position(&mut self, _handle: CharacterHandle, _pos: crate::math::Vec3, _teleport: bool) {}
        fn set_character_orientation(&mut self, _handle: CharacterHandle, _orientation: crate::math::Vec3) {}
        fn set_character_walk(&mut self, _handle: CharacterHandle, _up: bool, _down: bool, _left: bool, _right: bool) {}
        fn set_character_animation(&mut self, _handle: CharacterHandle, _fire: bool, _jump: bool, _crouch: bool, _aim: bool) {}
        fn set_character_dead(&mut self, _handle: CharacterHandle, _dead: bool) {}
        fn get_hit_direction(&self, _handle: CharacterHandle, _from: crate::math::Vec3) -> u8 {
            0
        }
        fn create_grenade(&mut self, _position: crate::math::Vec3, _velocity: crate::math::Vec3, _fuse: f64) -> GrenadeHandle {
            GrenadeHandle(0)
        }
        fn destroy_grenade(&mut self, _handle: GrenadeHandle) {}
        fn grenade_position(&self, _handle: GrenadeHandle) -> crate::math::Vec3 {
            [0.0, 0.0, 0.0]
        }
        fn grenade_damage(&self, _handle: GrenadeHandle, _point: crate::math::Vec3) -> i32 {
            0
        }
        fn update(&mut self, _dt: f64) -> Vec<GrenadeExplosion> {
            Vec::new()
        }
    }

    fn session_with(addr: &str, player_id: u32, character: Option<CharacterHandle>) -> Session {
        let mut s = Session::new(addr.parse().unwrap(), 0, 0.0);
        s.player_id = Some(player_id);
        s.character = character;
        s.state = SessionState::InGame;
        s
    }

    #[test]
    fn orientation_broadcast_skips_far_recipients() {
        let world = StubWorld;
        let mut transport = RecordingTransport { sent: Vec::new() };
        let sender = session_with("127.0.0.1:1", 1, Some(CharacterHandle(0)));
        let near = session_with("127.0.0.1:2", 2, Some(CharacterHandle(0)));
        let far = session_with("127.0.0.1:3", 3, Some(CharacterHandle(1)));
        let mut sessions = vec![
            (SessionHandle(1), sender),
            (SessionHandle(2), near),
            (SessionHandle(3), far),
        ];
        let payload = [9u8, 1, 2, 3];
        let broadcast = Broadcast {
            contained_payload: &payload,
            sender: Some(SessionHandle(1)),
            team_filter: None,
            sequenced: true,
            save: false,
        };
        dispatch(&mut sessions, &world, &mut transport, &broadcast);
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].1, "127.0.0.1:2".parse().unwrap());
    }

    #[test]
    fn join_window_session_only_gets_saved_loader_when_save_is_set() {
        let world = StubWorld;
        let mut transport = RecordingTransport { sent: Vec::new() };
        let mut joining = session_with("127.0.0.1:2", 2, None);
        joining.state = SessionState::JoinWindow;
        let mut sessions = vec![(SessionHandle(2), joining)];
        let payload = [1u8, 2, 3];
        let broadcast = Broadcast {
            contained_payload: &payload,
            sender: None,
            team_filter: None,
            sequenced: false,
            save: true,
        };
        dispatch(&mut sessions, &world, &mut transport, &broadcast);
        assert!(transport.sent.is_empty());
        assert_eq!(sessions[0].1.saved_loaders.as_ref().unwrap().len(), 1);
    }
}
