//! `GameServer`: owns the session slab, the two teams, the collaborator
//! trait objects, and wires every other module's pure functions together
//! into the datagram-in / datagram-out server loop.

use std::collections::HashMap;
use std::net::SocketAddr;

use ctf_common::{
    BlockActionKind, ContainedLoaderId, IdPool, LoaderId, MultiKeyIndex, PacketReader, PacketWriter,
    Veto, WireResult, CONNECTIONLESS, SYSTEM_SENDER_ID,
};

use crate::broadcast::{self, Broadcast};
use crate::collaborators::{Extension, Map, MasterClient, SessionId, Transport, WorldKernel};
use crate::config::Config;
use crate::ctf_rules::{self, CaptureOutcome, GrenadeRegistry};
use crate::game_loop;
use crate::loaders::*;
use crate::session::{Session, SessionHandle, SessionState, Tool, Weapon};
use crate::session_fsm::{self, BlockRateOutcome, KillCause, RejectReason};
use crate::team::{Team, TeamId};
use tracing::{info, warn};

/// Fields every contained-loader handler needs: the two teams, the
/// collaborators, the clock, and the session-lookup tables. Bundled so
/// handler signatures stay short; see `session_fsm`'s per-function style
/// for why the handlers themselves stay free functions instead of
/// methods on this struct wherever they don't need the slab.
pub struct GameServer {
    config: Config,
    sessions: Vec<(SessionHandle, Session)>,
    by_addr: HashMap<SocketAddr, SessionHandle>,
    names: MultiKeyIndex<SessionHandle>,
    handle_pool: IdPool,
    player_id_pool: IdPool,
    teams: [Team; 2],
    grenades: GrenadeRegistry,
    map: Box<dyn Map>,
    world: Box<dyn WorldKernel>,
    transport: Box<dyn Transport>,
    master: Box<dyn MasterClient>,
    extension: Box<dyn Extension>,
}

impl GameServer {
    pub fn new(
        config: Config,
        map: Box<dyn Map>,
        world: Box<dyn WorldKernel>,
        transport: Box<dyn Transport>,
        master: Box<dyn MasterClient>,
        extension: Box<dyn Extension>,
    ) -> Self {
        let capacity = config.max_players.min(32);
        let teams = [Team::new(TeamId::Blue, map.as_ref()), Team::new(TeamId::Green, map.as_ref())];
        Self {
            config,
            sessions: Vec::new(),
            by_addr: HashMap::new(),
            names: MultiKeyIndex::new(),
            handle_pool: IdPool::new(capacity),
            player_id_pool: IdPool::new(capacity),
            teams,
            grenades: GrenadeRegistry::new(),
            map,
            world,
            transport,
            master,
            extension,
        }
    }

    fn session_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|(h, _)| *h == handle).map(|(_, s)| s)
    }

    fn session(&self, handle: SessionHandle) -> Option<&Session> {
        self.sessions.iter().find(|(h, _)| *h == handle).map(|(_, s)| s)
    }

    fn index_of(&self, handle: SessionHandle) -> Option<usize> {
        self.sessions.iter().position(|(h, _)| *h == handle)
    }

    /// Entry point for a demultiplexed, already-session-routed datagram
    /// (the Transport collaborator owns framing/demux, per spec.md
    /// §4.6). `addr` identifies the peer; a `ConnectionRequest` on an
    /// unknown address creates a fresh session.
    pub fn on_datagram(&mut self, addr: SocketAddr, bytes: &[u8], now: f64) {
        let Some(&first) = bytes.first() else { return };
        let Some(loader) = LoaderId::from_byte(first) else {
            warn!(?addr, loader = first, "dropping datagram with unknown loader id");
            return;
        };
        let rest = &bytes[1..];

        match loader {
            LoaderId::ConnectionRequest => self.handle_connection_request(addr, rest, now),
            LoaderId::Disconnect => {
                if let Some(&handle) = self.by_addr.get(&addr) {
                    self.disconnect_session(handle);
                }
            }
            LoaderId::Ping => {
                self.transport.send(&[LoaderId::Ping as u8], addr);
            }
            LoaderId::SizedData | LoaderId::SizedSequenceData => {
                let Some(&handle) = self.by_addr.get(&addr) else { return };
                let mut reader = PacketReader::new(rest);
                if loader == LoaderId::SizedSequenceData {
                    // Client-originated sequence numbers are advisory and
                    // unused server-side; only the server's own outbound
                    // sequence (see `broadcast`) is authoritative.
                    let _ = reader.read_short();
                }
                let Ok(id_byte) = reader.read_byte() else { return };
                let Some(contained) = ContainedLoaderId::from_byte(id_byte) else {
                    warn!(?addr, contained = id_byte, "dropping unknown contained loader");
                    return;
                };
                if let Err(err) = self.handle_contained(handle, contained, &mut reader, now) {
                    warn!(?addr, %err, "dropping malformed contained loader");
                }
            }
            LoaderId::ConnectionResponse | LoaderId::Packet10NoOp => {}
        }
    }

    fn handle_connection_request(&mut self, addr: SocketAddr, rest: &[u8], now: f64) {
        let mut reader = PacketReader::new(rest);
        let Ok(client_version) = reader.read_long() else { return };

        let same_ip = self
            .sessions
            .iter()
            .filter(|(_, s)| s.addr.ip() == addr.ip())
            .count();
        let connections_including_this_one = self.sessions.len() + 1;

        if let Err(reason) = session_fsm::check_handshake(
            client_version,
            self.config.version,
            connections_including_this_one,
            same_ip + 1,
            &self.config,
        ) {
            info!(?addr, ?reason, "rejecting connection request");
            return;
        }

        let Some(raw_handle) = self.handle_pool.acquire() else {
            info!(?addr, "rejecting connection request: no free session slots");
            return;
        };
        let handle = SessionHandle(raw_handle);
        let mut session = Session::new(addr, raw_handle, now);
        session.flags.set(crate::session::SessionFlags::SPEEDHACK_DETECT, self.config.speedhack_detect);

        if self.extension.on_connect(raw_handle).is_denied() {
            self.handle_pool.release(raw_handle);
            return;
        }

        session.state = SessionState::JoinWindow;
        self.sessions.push((handle, session));
        self.by_addr.insert(addr, handle);

        let mut writer = PacketWriter::new();
        writer.write_byte(LoaderId::ConnectionResponse as u8);
        self.transport.send(&writer.data, addr);
    }

    fn handle_contained(&mut self, handle: SessionHandle, id: ContainedLoaderId, reader: &mut PacketReader, now: f64) -> WireResult<()> {
        match id {
            ContainedLoaderId::ExistingPlayer => self.handle_existing_player(handle, ExistingPlayer::decode(reader)?, now),
            ContainedLoaderId::PositionData => self.handle_position_data(handle, PositionData::decode(reader)?, now),
            ContainedLoaderId::OrientationData => self.handle_orientation_data(handle, OrientationData::decode(reader)?),
            ContainedLoaderId::InputData => self.handle_input_data(handle, InputData::decode(reader)?),
            ContainedLoaderId::WeaponReload => self.handle_weapon_reload(handle, WeaponReload::decode(reader)?),
            ContainedLoaderId::HitPacket => self.handle_hit(handle, HitPacket::decode(reader)?, now),
            ContainedLoaderId::GrenadePacket => self.handle_grenade(handle, GrenadePacket::decode(reader)?),
            ContainedLoaderId::SetTool => self.handle_set_tool(handle, SetTool::decode(reader)?),
            ContainedLoaderId::SetColor => self.handle_set_color(handle, SetColor::decode(reader)?),
            ContainedLoaderId::BlockAction => self.handle_block_action(handle, BlockAction::decode(reader)?, now),
            ContainedLoaderId::ChatMessage => self.handle_chat(handle, ChatMessage::decode(reader)?),
            ContainedLoaderId::FogColor => self.handle_fog_color(handle, FogColor::decode(reader)?),
            ContainedLoaderId::ChangeWeapon => self.handle_change_weapon(handle, ChangeWeapon::decode(reader)?, now),
            ContainedLoaderId::ChangeTeam => self.handle_change_team(handle, ChangeTeam::decode(reader)?, now),
            // Client never originates these; a client that sends one is
            // ignored rather than torn down.
            _ => {}
        }
        Ok(())
    }

    /// ExistingPlayer: the join-window name/team negotiation. A session only leaves `JoinWindow` once this arrives.
    fn handle_existing_player(&mut self, handle: SessionHandle, packet: ExistingPlayer, now: f64) {
        let Some(session) = self.session(handle) else { return };
        if session.state != SessionState::JoinWindow {
            return;
        }

        let Some(requested_team) = TeamId::from_index(packet.team) else { return };
        let Some(weapon) = Weapon::from_byte(packet.weapon) else { return };
        let Some(tool) = Tool::from_byte(packet.tool) else { return };
        let Some(player_id) = self.player_id_pool.acquire() else {
            self.disconnect_session(handle);
            return;
        };

        let veto = self.extension.on_team_join(player_id, requested_team);
        let team = session_fsm::resolve_team_join(requested_team, veto);
        let name = session_fsm::resolve_join_name(&packet.name, player_id, &self.names);
        self.names.insert(player_id, &name, handle);

        let spawn_position = session_fsm::pick_spawn_position(&self.teams[team.index()], self.map.as_ref());
        let character = self.world.create_character(spawn_position);

        {
            let session = self.session_mut(handle).expect("looked up above");
            session.player_id = Some(player_id);
            session.name = Some(name.clone());
            session.team = Some(team);
            session.weapon = weapon;
            session.tool = tool;
            session.color = packet.color;
            session.character = Some(character);
            session_fsm::apply_spawn_loadout(session);
        }

        self.extension.on_login(player_id, &name);
        self.send_join_snapshot(handle);

        if let Some(session) = self.session_mut(handle) {
            session.state = SessionState::InGame;
        }
        if let Some(session) = self.session_mut(handle) {
            broadcast::drain_saved_loaders(session, self.transport.as_mut());
        }
        self.extension.on_join(player_id);

        let mut w = PacketWriter::new();
        CreatePlayer { player_id: player_id as u8, weapon: weapon as u8, team: team as u8, position: spawn_position, name }
            .encode(&mut w);
        // Unlike every other contained broadcast, the joiner itself must
        // see its own CreatePlayer — it is the client's spawn confirmation,
        // not just a peer notification.
        self.broadcast_contained(ContainedLoaderId::CreatePlayer, &w.data, None, None, true, true);
        let _ = now;
    }

    /// Sends the full join snapshot (the compressed map, every existing
    /// player's `ExistingPlayer`, and `StateData`) to a session still in
    /// `JoinWindow`, matching the original's `_connection_ack`.
    fn send_join_snapshot(&mut self, handle: SessionHandle) {
        let Some(joining) = self.session(handle) else { return };
        let addr = joining.addr;

        self.send_compressed_map(addr);

        for (other_handle, other) in &self.sessions {
            if *other_handle == handle {
                continue;
            }
            let (Some(player_id), Some(name), Some(team)) = (other.player_id, other.name.clone(), other.team) else {
                continue;
            };
            let mut w = PacketWriter::new();
            ExistingPlayer {
                player_id: player_id as u8,
                team: team as u8,
                weapon: other.weapon as u8,
                tool: other.tool as u8,
                kills: other.kills,
                color: other.color,
                name,
            }
            .encode(&mut w);
            self.send_contained(ContainedLoaderId::ExistingPlayer, &w.data, addr);
        }

        let state = self.build_state_data(self.session(handle).and_then(|s| s.player_id).unwrap_or(0) as u8);
        let mut w = PacketWriter::new();
        state.encode(&mut w);
        self.send_contained(ContainedLoaderId::StateData, &w.data, addr);
    }

    /// zlib-compresses the current map and frames it as a `MapStart(size)`
    /// followed by `MAP_CHUNK_SIZE`-byte `MapChunk`s. The
    /// original paces chunks on the transport's send-completion ack, at
    /// most `MAP_CHUNKS_IN_FLIGHT` outstanding at a time; `Transport::send`
    /// here is synchronous, so every chunk is already "acked" by the time
    /// the call returns and the whole map goes out in one pass.
    fn send_compressed_map(&mut self, addr: SocketAddr) {
        use flate2::read::ZlibEncoder;
        use flate2::Compression;
        use std::io::Read;

        let raw = self.map.generate();
        let mut encoder = ZlibEncoder::new(raw.as_slice(), Compression::default());
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).expect("in-memory zlib compression cannot fail");

        let mut w = PacketWriter::new();
        MapStart { size: compressed.len() as u32 }.encode(&mut w);
        self.send_contained(ContainedLoaderId::MapStart, &w.data, addr);

        for chunk in compressed.chunks(crate::constants::MAP_CHUNK_SIZE) {
            let mut w = PacketWriter::new();
            MapChunk { data: chunk.to_vec() }.encode(&mut w);
            self.send_contained(ContainedLoaderId::MapChunk, &w.data, addr);
        }
    }

    fn build_state_data(&self, player_id: u8) -> StateData {
        let team_state = |team: &Team| CtfTeamState {
            score: team.score,
            base: team.base.position(),
            flag: team.flag.position(),
            carrier: team.flag.carrier.and_then(|h| self.session(h)).and_then(|s| s.player_id).map(|id| id as u8),
        };
        StateData {
            player_id,
            fog_color: self.config.fog_color,
            cap_limit: self.config.max_score,
            blue: team_state(&self.teams[TeamId::Blue.index()]),
            green: team_state(&self.teams[TeamId::Green.index()]),
        }
    }

    fn handle_position_data(&mut self, handle: SessionHandle, packet: PositionData, now: f64) {
        use crate::input_validator::is_valid_coordinate;

        if !is_valid_coordinate(packet.position) {
            if let Some(session) = self.session_mut(handle) {
                if let Some(player_id) = session.player_id {
                    warn!(player_id, "dropped non-finite PositionData");
                    self.extension.on_hack_attempt(player_id, "non-finite position");
                }
            }
            return;
        }

        let Some(index) = self.index_of(handle) else { return };
        let (_, mut session) = std::mem::replace(&mut self.sessions[index], (handle, Session::new(self.sessions[index].1.addr, 0, now)));
        if session.state != SessionState::InGame || session.character.is_none() {
            self.sessions[index] = (handle, session);
            return;
        }

        let outcome = session_fsm::handle_position_update(
            handle,
            &mut session,
            self.world.as_mut(),
            packet.position,
            &self.config,
            &mut self.teams,
            self.map.as_ref(),
            now,
        );

        if let Some(authoritative) = outcome.rubber_banded {
            if let Some(player_id) = session.player_id {
                self.extension.on_hack_attempt(player_id, "rubber-banded position");
            }
            let mut w = PacketWriter::new();
            PositionData { player_id: session.player_id.unwrap_or(0) as u8, position: authoritative }.encode(&mut w);
            self.send_contained(ContainedLoaderId::PositionData, &w.data, session.addr);
            self.sessions[index] = (handle, session);
            return;
        }

        self.sessions[index] = (handle, session);

        if outcome.picked_up_flag {
            self.extension.on_flag_take(self.session(handle).and_then(|s| s.player_id).unwrap_or(0));
            let player_id = self.session(handle).and_then(|s| s.player_id).unwrap_or(0) as u8;
            let mut w = PacketWriter::new();
            IntelPickup { player_id }.encode(&mut w);
            self.broadcast_contained(ContainedLoaderId::IntelPickup, &w.data, None, None, true, true);
        }

        if outcome.refill_due {
            let player_id = self.session(handle).and_then(|s| s.player_id).unwrap_or(0);
            if !self.extension.on_refill(player_id).is_denied() {
                if let Some(session) = self.session_mut(handle) {
                    ctf_rules::apply_refill(session);
                }
                let mut w = PacketWriter::new();
                Restock.encode(&mut w);
                self.send_contained(ContainedLoaderId::Restock, &w.data, self.session(handle).map(|s| s.addr).unwrap());
            }
        }

        if let Some(captured) = outcome.captured {
            self.finish_capture(handle, captured);
        }

        let player_id = self.session(handle).and_then(|s| s.player_id);
        if let Some(player_id) = player_id {
            self.extension.on_position_update(player_id);
        }

        let player_id = self.session(handle).and_then(|s| s.player_id).unwrap_or(0) as u8;
        let mut w = PacketWriter::new();
        PositionData { player_id, position: packet.position }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::PositionData, &w.data, Some(handle), None, true, false);
    }

    fn finish_capture(&mut self, handle: SessionHandle, outcome: CaptureOutcome) {
        let CaptureOutcome::Captured { team_won } = outcome else { return };
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        self.extension.on_flag_capture(player_id);

        let mut w = PacketWriter::new();
        IntelCapture { player_id: player_id as u8, winning: team_won }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::IntelCapture, &w.data, None, None, true, true);

        if let Some(session) = self.session_mut(handle) {
            session.kills += 10;
        }
        if let Some(team) = self.session(handle).and_then(|s| s.team) {
            if !team_won {
                self.teams[team.index()].kills += 1;
            }
        }

        if team_won {
            let winner = self.session(handle).and_then(|s| s.player_id);
            self.extension.on_game_end(winner);
            ctf_rules::reset_game(&mut self.teams, self.map.as_ref());
            let handles: Vec<SessionHandle> = self.sessions.iter().map(|(h, _)| *h).collect();
            for session_handle in handles {
                self.respawn_session(session_handle, true);
            }
        }
    }

    fn handle_orientation_data(&mut self, handle: SessionHandle, packet: OrientationData) {
        let Some(session) = self.session(handle) else { return };
        if session.state != SessionState::InGame {
            return;
        }
        if let Some(character) = session.character {
            self.world.set_character_orientation(character, packet.orientation);
        }
        let player_id = session.player_id.unwrap_or(0) as u8;
        let mut w = PacketWriter::new();
        OrientationData { player_id, orientation: packet.orientation }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::OrientationData, &w.data, Some(handle), None, true, false);
    }

    fn handle_input_data(&mut self, handle: SessionHandle, packet: InputData) {
        use crate::input_validator::jump_allowed;

        let Some(session) = self.session(handle) else { return };
        if session.state != SessionState::InGame {
            return;
        }
        let Some(character) = session.character else { return };
        let z_accel = self.world.character_acceleration(character)[2];
        let jump = packet.jump && jump_allowed(z_accel);

        self.world.set_character_walk(character, packet.up, packet.down, packet.left, packet.right);
        self.world.set_character_animation(character, packet.fire, jump, packet.crouch, packet.aim);
        if let Some(session) = self.session_mut(handle) {
            session.flags.set(crate::session::SessionFlags::FLY, packet.crouch && packet.jump);
        }

        let player_id = self.session(handle).and_then(|s| s.player_id).unwrap_or(0) as u8;
        let mut w = PacketWriter::new();
        InputData { player_id, jump, ..packet }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::InputData, &w.data, Some(handle), None, false, false);
    }

    fn handle_weapon_reload(&mut self, handle: SessionHandle, _packet: WeaponReload) {
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id).map(|id| id as u8) else { return };
        let mut w = PacketWriter::new();
        WeaponReload { player_id }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::WeaponReload, &w.data, Some(handle), None, false, false);
    }

    fn handle_hit(&mut self, handle: SessionHandle, packet: HitPacket, now: f64) {
        let Some(shooter_team) = self.session(handle).and_then(|s| s.team) else { return };
        let Some(shooter_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let Some(&victim_handle) = self.names.get_by_player_id(packet.victim_player_id as u32).as_ref() else { return };
        let Some(damage) = session_fsm::hit_amount(self.session(handle).map(|s| s.weapon).unwrap_or(Weapon::Rifle), packet.zone) else {
            return;
        };

        let applies = self
            .session(victim_handle)
            .map(|victim| ctf_rules::resolve_friendly_fire(victim, shooter_team, &self.config, now))
            .unwrap_or(false);
        if !applies {
            return;
        }

        let veto = self.extension.on_hit(shooter_id, packet.victim_player_id as u32, damage);
        let Some(damage) = veto.resolve(damage) else { return };

        let Some(index) = self.index_of(victim_handle) else { return };
        let killed = ctf_rules::apply_damage(&mut self.sessions[index].1, damage);

        self.send_set_hp(victim_handle, Some(handle), true);

        if killed {
            self.run_kill(victim_handle, KillCause::Weapon(handle), now);
        }
    }

    /// `not_fall` is `false` only for fall-damage impacts; every other
    /// cause of damage (weapon, grenade) sends `true`, per `server.py:602`.
    fn send_set_hp(&mut self, victim_handle: SessionHandle, from: Option<SessionHandle>, not_fall: bool) {
        let Some(victim) = self.session(victim_handle) else { return };
        let Some(hp) = victim.hp else { return };
        let hit_indicator = match (from.and_then(|h| self.session(h)).and_then(|s| s.character), victim.character) {
            (Some(attacker_char), Some(victim_char)) => {
                let from_pos = self.world.character_position(attacker_char);
                self.world.get_hit_direction(victim_char, from_pos)
            }
            _ => 0,
        };
        let mut w = PacketWriter::new();
        SetHp { hp: hp as u8, not_fall, hit_indicator }.encode(&mut w);
        self.send_contained(ContainedLoaderId::SetHp, &w.data, victim.addr);
    }

    fn handle_grenade(&mut self, handle: SessionHandle, packet: GrenadePacket) {
        let Some(session) = self.session(handle) else { return };
        if !session_fsm::can_throw_grenade(session) {
            return;
        }
        if self.extension.on_grenade(session.player_id.unwrap_or(0), packet.fuse).is_denied() {
            return;
        }

        let grenade = self.world.create_grenade(packet.position, packet.velocity, packet.fuse as f64);
        self.grenades.register(grenade, handle);
        if let Some(session) = self.session_mut(handle) {
            session_fsm::consume_grenade(session);
        }
        let player_id = self.session(handle).and_then(|s| s.player_id);
        if let Some(player_id) = player_id {
            self.extension.on_grenade_thrown(player_id, grenade);
        }

        let wire_player_id = player_id.unwrap_or(0) as u8;
        let mut w = PacketWriter::new();
        GrenadePacket { player_id: wire_player_id, ..packet }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::GrenadePacket, &w.data, Some(handle), None, false, false);
    }

    fn handle_set_tool(&mut self, handle: SessionHandle, packet: SetTool) {
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let Some(tool) = Tool::from_byte(packet.value) else { return };
        let veto = self.extension.on_tool_set_attempt(player_id, packet.value);
        let Some(value) = veto.resolve(packet.value) else { return };
        if let Some(session) = self.session_mut(handle) {
            session.tool = Tool::from_byte(value).unwrap_or(tool);
        }
        self.extension.on_tool_changed(player_id, value);

        let mut w = PacketWriter::new();
        SetTool { player_id: player_id as u8, value }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::SetTool, &w.data, Some(handle), None, false, false);
    }

    fn handle_set_color(&mut self, handle: SessionHandle, packet: SetColor) {
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let veto = self.extension.on_color_set_attempt(player_id, packet.color);
        let Some(color) = veto.resolve(packet.color) else { return };
        if let Some(session) = self.session_mut(handle) {
            session.color = color;
        }
        self.extension.on_color_set(player_id, color);

        let mut w = PacketWriter::new();
        SetColor { player_id: player_id as u8, color }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::SetColor, &w.data, Some(handle), None, false, true);
    }

    fn handle_block_action(&mut self, handle: SessionHandle, packet: BlockAction, now: f64) {
        let Some(kind) = BlockActionKind::from_byte(packet.value) else { return };
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };

        let rate = self.session_mut(handle).map(|s| session_fsm::check_block_rate(s, now)).unwrap_or(BlockRateOutcome::Ok);
        if let BlockRateOutcome::RateLimited { hack_detected } = rate {
            if hack_detected {
                warn!(player_id, "rapid-fire block action detected");
                self.extension.on_hack_attempt(player_id, "rapid block actions");
            }
            return;
        }

        let veto = match kind {
            BlockActionKind::Build => self.extension.on_block_build_attempt(player_id, packet.x, packet.y, packet.z),
            _ => self.extension.on_block_destroy(player_id, packet.x, packet.y, packet.z, packet.value),
        };
        if veto.is_denied() {
            return;
        }

        let Some(index) = self.index_of(handle) else { return };
        let (_, ref mut session) = self.sessions[index];
        let outcome = session_fsm::apply_block_action(session, kind, packet.x, packet.y, packet.z, self.map.as_mut(), now);
        if outcome != session_fsm::BlockActionOutcome::Applied {
            return;
        }

        match kind {
            BlockActionKind::Build => self.extension.on_block_build(player_id, packet.x, packet.y, packet.z),
            _ => self.extension.on_block_removed(packet.x, packet.y, packet.z),
        }

        let mut w = PacketWriter::new();
        BlockAction { player_id: player_id as u8, ..packet }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::BlockAction, &w.data, Some(handle), None, false, true);
    }

    fn handle_chat(&mut self, handle: SessionHandle, packet: ChatMessage) {
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let truncated: String = packet.value.chars().take(crate::constants::MAX_CHAT_SIZE).collect();

        if let Some((command, args)) = session_fsm::parse_command(&truncated) {
            self.extension.on_command(player_id, &command, &args);
            return;
        }

        let global = packet.chat_type != 0;
        let veto = self.extension.on_chat(player_id, &truncated, global);
        let Some(message) = veto.resolve(truncated) else { return };

        let team_filter = if global { None } else { self.session(handle).and_then(|s| s.team) };
        let mut w = PacketWriter::new();
        ChatMessage { player_id: player_id as u8, chat_type: packet.chat_type, value: message }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::ChatMessage, &w.data, Some(handle), team_filter, false, false);
    }

    fn handle_fog_color(&mut self, handle: SessionHandle, packet: FogColor) {
        let Some(session) = self.session(handle) else { return };
        if !session.flags.contains(crate::session::SessionFlags::MASTER) {
            return;
        }
        self.config.fog_color = packet.color;
        let mut w = PacketWriter::new();
        FogColor { color: packet.color }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::FogColor, &w.data, None, None, false, true);
    }

    fn handle_change_weapon(&mut self, handle: SessionHandle, packet: ChangeWeapon, now: f64) {
        let Some(weapon) = Weapon::from_byte(packet.weapon) else { return };
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let veto = self.extension.on_weapon_set(player_id, packet.weapon);
        let Some(value) = veto.resolve(packet.weapon) else { return };

        if self.session(handle).is_some_and(|s| s.is_alive()) {
            self.run_kill(handle, KillCause::ClassChange, now);
        }
        if let Some(session) = self.session_mut(handle) {
            session.weapon = Weapon::from_byte(value).unwrap_or(weapon);
        }

        let mut w = PacketWriter::new();
        ChangeWeapon { player_id: player_id as u8, weapon: value }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::ChangeWeapon, &w.data, Some(handle), None, false, true);
        self.respawn_session(handle, false);
    }

    fn handle_change_team(&mut self, handle: SessionHandle, packet: ChangeTeam, now: f64) {
        let Some(requested) = TeamId::from_index(packet.team) else { return };
        let Some(player_id) = self.session(handle).and_then(|s| s.player_id) else { return };
        let veto = self.extension.on_team_join(player_id, requested);
        let team = session_fsm::resolve_team_join(requested, veto);

        if self.session(handle).is_some_and(|s| s.is_alive()) {
            self.run_kill(handle, KillCause::TeamChange, now);
        }
        self.extension.on_team_leave(player_id);
        if let Some(session) = self.session_mut(handle) {
            session.team = Some(team);
        }

        let mut w = PacketWriter::new();
        ChangeTeam { player_id: player_id as u8, team: team as u8 }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::ChangeTeam, &w.data, Some(handle), None, false, true);
        self.respawn_session(handle, false);
    }

    /// Runs the kill sequence for `victim_handle` and broadcasts the
    /// resulting `KillAction`, awarding the killer's score if there was
    /// one.
    fn run_kill(&mut self, victim_handle: SessionHandle, cause: KillCause, now: f64) {
        let Some(index) = self.index_of(victim_handle) else { return };
        let (_, ref mut victim) = self.sessions[index];
        let result = session_fsm::perform_kill(victim_handle, victim, cause, self.world.as_ref(), &mut self.teams, self.map.as_ref(), now);
        let victim_player_id = victim.player_id.unwrap_or(0);

        if let Some(character) = victim.character {
            self.world.set_character_dead(character, true);
        }

        if let Some((team_id, position)) = result.dropped_flag {
            self.extension.on_flag_drop(victim_player_id);
            self.teams[team_id.index()].flag.set_position(position);
            let mut w = PacketWriter::new();
            IntelDrop { player_id: victim_player_id as u8, position }.encode(&mut w);
            self.broadcast_contained(ContainedLoaderId::IntelDrop, &w.data, None, None, false, true);
        }

        if let Some(killer_handle) = result.killer {
            if let Some(killer) = self.session_mut(killer_handle) {
                killer.kills += 1;
            }
            if let Some(team) = self.session(killer_handle).and_then(|s| s.team) {
                self.teams[team.index()].kills += 1;
            }
        }
        self.extension.on_kill(victim_player_id, result.killer.and_then(|h| self.session(h)).and_then(|s| s.player_id));

        let killer_player_id = result.killer.and_then(|h| self.session(h)).and_then(|s| s.player_id).unwrap_or(0);
        let mut w = PacketWriter::new();
        KillAction {
            player_id: victim_player_id as u8,
            killer_id: killer_player_id as u8,
            kill_type: result.kill_type as u8,
        }
        .encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::KillAction, &w.data, None, None, false, true);
    }

    /// Respawns a session immediately (used after a capture-triggered
    /// game reset and after a mid-game team/weapon change) or leaves it
    /// queued for `game_loop`'s timer-based respawn otherwise.
    fn respawn_session(&mut self, handle: SessionHandle, immediate: bool) {
        let Some(session) = self.session(handle) else { return };
        if !immediate && session.is_alive() {
            return;
        }
        let Some(team) = session.team else { return };
        let spawn_position = session_fsm::pick_spawn_position(&self.teams[team.index()], self.map.as_ref());

        if let Some(session) = self.session_mut(handle) {
            if let Some(character) = session.character {
                self.world.set_character_position(character, spawn_position, true);
                self.world.set_character_dead(character, false);
            } else {
                session.character = Some(self.world.create_character(spawn_position));
            }
            session_fsm::apply_spawn_loadout(session);
        }

        let player_id = self.session(handle).and_then(|s| s.player_id).unwrap_or(0);
        self.extension.on_spawn(player_id, spawn_position);

        let (weapon, team_byte, name) = {
            let session = self.session(handle).expect("just spawned");
            (session.weapon as u8, team as u8, session.name.clone().unwrap_or_default())
        };
        let mut w = PacketWriter::new();
        CreatePlayer { player_id: player_id as u8, weapon, team: team_byte, position: spawn_position, name }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::CreatePlayer, &w.data, None, None, true, true);
    }

    fn disconnect_session(&mut self, handle: SessionHandle) {
        let Some(index) = self.index_of(handle) else { return };
        let (_, session) = self.sessions.remove(index);
        self.by_addr.remove(&session.addr);
        self.handle_pool.release(handle.0);

        let last_position = session
            .character
            .map(|character| self.world.character_position(character))
            .unwrap_or(crate::math::VEC3_ORIGIN);

        if let Some(player_id) = session.player_id {
            if let Some(name) = &session.name {
                self.names.remove(player_id, name);
            }
            self.player_id_pool.release(player_id);

            // A disconnecting carrier drops the flag exactly like a kill
            // does: snap to rest
            // below the last known position and broadcast IntelDrop,
            // rather than respawning it at a fresh random location.
            if let Some((_, drop_position)) = ctf_rules::drop_flag(handle, &mut self.teams, last_position, self.map.as_ref()) {
                self.extension.on_flag_drop(player_id);
                let mut w = PacketWriter::new();
                IntelDrop { player_id: player_id as u8, position: drop_position }.encode(&mut w);
                self.broadcast_contained(ContainedLoaderId::IntelDrop, &w.data, None, None, false, true);
            }

            let mut w = PacketWriter::new();
            PlayerLeft { player_id: player_id as u8 }.encode(&mut w);
            self.broadcast_contained(ContainedLoaderId::PlayerLeft, &w.data, None, None, false, false);
        }
        if let Some(character) = session.character {
            self.world.destroy_character(character);
        }
        self.master.set_count(self.sessions.len() as u32);
    }

    /// Runs one fixed-interval world tick: advances
    /// physics, resolves detonated grenades, settles entities, and
    /// respawns anyone whose timer elapsed.
    pub fn tick(&mut self, dt: f64, now: f64) {
        let explosions = self.world.update(dt);
        for explosion in explosions {
            self.resolve_grenade_explosion(&explosion, now);
        }

        let falls = self.world.take_fall_impacts();
        for impact in falls {
            self.resolve_fall_impact(&impact, now);
        }

        game_loop::settle_entities(&mut self.teams, self.map.as_ref());
        self.extension.on_world_update();

        let due: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|(_, s)| game_loop::due_for_respawn(s, now, self.config.respawn_time))
            .map(|(h, _)| *h)
            .collect();
        for handle in due {
            self.respawn_session(handle, true);
        }
    }

    /// Applies fall damage reported by the WorldKernel: runs `on_fall`
    /// (which may veto the damage entirely or substitute a different
    /// amount), applies it, and kills the victim outright (no killer)
    /// if it brings hp to zero.
    fn resolve_fall_impact(&mut self, impact: &crate::collaborators::FallImpact, now: f64) {
        let Some(target) = game_loop::fall_impact_target(impact, &self.sessions) else { return };
        let Some(player_id) = self.session(target).and_then(|s| s.player_id) else { return };

        let veto = self.extension.on_fall(player_id, impact.damage);
        let Some(damage) = veto.resolve(impact.damage) else { return };

        let Some(index) = self.index_of(target) else { return };
        let killed = ctf_rules::apply_damage(&mut self.sessions[index].1, damage);
        self.send_set_hp(target, None, false);
        if killed {
            self.run_kill(target, KillCause::Fall, now);
        }
    }

    /// Detonations outside the world box are discarded with no damage, no
    /// block removal, and no broadcast, matching `server.py:722`. Each hit
    /// (including the thrower's own self-damage) runs through `on_hit`
    /// with veto/substitute exactly like `handle_hit`, and the block cube
    /// runs through `on_block_destroy`/`on_block_removed` like a regular
    /// destroy action.
    fn resolve_grenade_explosion(&mut self, explosion: &crate::collaborators::GrenadeExplosion, now: f64) {
        let Some(thrower) = game_loop::take_grenade_thrower(&mut self.grenades, explosion) else { return };

        let [x, y, z] = explosion.position;
        if !(0.0..=crate::constants::WORLD_MAX_X).contains(&x)
            || !(0.0..=crate::constants::WORLD_MAX_Y).contains(&y)
            || !(0.0..=crate::constants::WORLD_MAX_Z).contains(&z)
        {
            return;
        }

        let thrower_player_id = self.session(thrower).and_then(|s| s.player_id).unwrap_or(0);

        let hits = game_loop::resolve_grenade_damage(thrower, &self.sessions, self.world.as_ref(), explosion);
        for hit in hits {
            let Some(victim_id) = self.session(hit.target).and_then(|s| s.player_id) else { continue };
            let veto = self.extension.on_hit(thrower_player_id, victim_id, hit.damage);
            let Some(damage) = veto.resolve(hit.damage) else { continue };

            let Some(index) = self.index_of(hit.target) else { continue };
            let killed = ctf_rules::apply_damage(&mut self.sessions[index].1, damage);
            self.send_set_hp(hit.target, Some(thrower), true);
            if killed {
                self.run_kill(hit.target, KillCause::Grenade(thrower), now);
            }
        }

        let center = game_loop::grenade_block_center(explosion.position);
        let veto = self.extension.on_block_destroy(thrower_player_id, center.0, center.1, center.2, BlockActionKind::GrenadeDestroy as u8);
        if veto.is_denied() {
            return;
        }
        game_loop::apply_grenade_block_removal(center, self.map.as_mut());
        let (cx, cy, cz) = center;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    self.extension.on_block_removed(cx + dx, cy + dy, cz + dz);
                }
            }
        }

        let mut w = PacketWriter::new();
        BlockAction {
            player_id: thrower_player_id as u8,
            value: BlockActionKind::GrenadeDestroy as u8,
            x: center.0,
            y: center.1,
            z: center.2,
        }
        .encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::BlockAction, &w.data, None, None, false, true);
    }

    /// Wraps a contained payload with its id byte and fans it out via
    /// `broadcast::dispatch`.
    fn broadcast_contained(
        &mut self,
        id: ContainedLoaderId,
        payload: &[u8],
        sender: Option<SessionHandle>,
        team_filter: Option<TeamId>,
        sequenced: bool,
        save: bool,
    ) {
        let mut w = PacketWriter::new();
        w.write_byte(id as u8);
        w.data.extend_from_slice(payload);
        let broadcast = Broadcast { contained_payload: &w.data, sender, team_filter, sequenced, save };
        broadcast::dispatch(&mut self.sessions, self.world.as_ref(), self.transport.as_mut(), &broadcast);
    }

    fn send_contained(&mut self, id: ContainedLoaderId, payload: &[u8], addr: SocketAddr) {
        let mut inner = PacketWriter::new();
        inner.write_byte(id as u8);
        inner.data.extend_from_slice(payload);
        let mut w = PacketWriter::new();
        w.push_sized(&inner.data);
        self.transport.send(&w.data, addr);
    }

    /// Server-origin chat notice sent under the reserved system sender
    /// id; used by CTFRules/GameLoop-internal notices.
    pub fn broadcast_system_message(&mut self, message: &str, global: bool) {
        let mut w = PacketWriter::new();
        ChatMessage { player_id: SYSTEM_SENDER_ID as u8, chat_type: global as u8, value: message.to_string() }.encode(&mut w);
        self.broadcast_contained(ContainedLoaderId::ChatMessage, &w.data, None, None, false, false);
    }
}

trait PushSized {
    fn push_sized(&mut self, contained_payload: &[u8]);
}

impl PushSized for PacketWriter {
    fn push_sized(&mut self, contained_payload: &[u8]) {
        self.write_byte(LoaderId::SizedData as u8);
        self.data.extend_from_slice(contained_payload);
    }
}

const _: u32 = CONNECTIONLESS;
