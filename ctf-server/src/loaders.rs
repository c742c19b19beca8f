//! Contained loaders: the gameplay payloads carried inside a Sized or
//! SizedSequence envelope. Bit layouts are fixed by client
//! compatibility; each struct here is a stack-allocated scratch value
//! encoded/decoded on demand, replacing the single shared mutable loader
//! globals spec.md §9 calls out for removal.

use ctf_common::{ContainedLoaderId, PacketReader, PacketWriter, WireResult};

use crate::math::Vec3;

#[derive(Debug, Clone)]
pub struct ExistingPlayer {
    pub player_id: u8,
    pub team: u8,
    pub weapon: u8,
    pub tool: u8,
    pub kills: u32,
    pub color: (u8, u8, u8),
    pub name: String,
}

impl ExistingPlayer {
    pub const ID: ContainedLoaderId = ContainedLoaderId::ExistingPlayer;

    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            team: r.read_byte()?,
            weapon: r.read_byte()?,
            tool: r.read_byte()?,
            kills: r.read_long()? as u32,
            color: r.read_color()?,
            name: r.read_string()?,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.team);
        w.write_byte(self.weapon);
        w.write_byte(self.tool);
        w.write_long(self.kills as i32);
        w.write_color(self.color);
        w.write_string(&self.name);
    }
}

#[derive(Debug, Clone)]
pub struct CreatePlayer {
    pub player_id: u8,
    pub weapon: u8,
    pub team: u8,
    pub position: Vec3,
    pub name: String,
}

impl CreatePlayer {
    pub const ID: ContainedLoaderId = ContainedLoaderId::CreatePlayer;

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.weapon);
        w.write_byte(self.team);
        w.write_pos(self.position);
        w.write_string(&self.name);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionData {
    pub player_id: u8,
    pub position: Vec3,
}

impl PositionData {
    pub const ID: ContainedLoaderId = ContainedLoaderId::PositionData;

    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            position: r.read_pos()?,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_pos(self.position);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrientationData {
    pub player_id: u8,
    pub orientation: Vec3,
}

impl OrientationData {
    pub const ID: ContainedLoaderId = ContainedLoaderId::OrientationData;

    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            orientation: r.read_pos()?,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_pos(self.orientation);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InputData {
    pub player_id: u8,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub crouch: bool,
    pub aim: bool,
    pub fire: bool,
}

impl InputData {
    pub const ID: ContainedLoaderId = ContainedLoaderId::InputData;

    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        let player_id = r.read_byte()?;
        let bits = r.read_byte()?;
        Ok(Self {
            player_id,
            up: bits & 1 != 0,
            down: bits & 2 != 0,
            left: bits & 4 != 0,
            right: bits & 8 != 0,
            jump: bits & 16 != 0,
            crouch: bits & 32 != 0,
            aim: bits & 64 != 0,
            fire: bits & 128 != 0,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        let mut bits = 0u8;
        if self.up { bits |= 1; }
        if self.down { bits |= 2; }
        if self.left { bits |= 4; }
        if self.right { bits |= 8; }
        if self.jump { bits |= 16; }
        if self.crouch { bits |= 32; }
        if self.aim { bits |= 64; }
        if self.fire { bits |= 128; }
        w.write_byte(self.player_id);
        w.write_byte(bits);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeaponReload {
    pub player_id: u8,
}

impl WeaponReload {
    pub const ID: ContainedLoaderId = ContainedLoaderId::WeaponReload;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { player_id: r.read_byte()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HitPacket {
    pub victim_player_id: u8,
    pub zone: u8,
}

impl HitPacket {
    pub const ID: ContainedLoaderId = ContainedLoaderId::HitPacket;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            victim_player_id: r.read_byte()?,
            zone: r.read_byte()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GrenadePacket {
    pub player_id: u8,
    pub fuse: f32,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl GrenadePacket {
    pub const ID: ContainedLoaderId = ContainedLoaderId::GrenadePacket;

    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            fuse: r.read_float()?,
            position: r.read_pos()?,
            velocity: r.read_pos()?,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_float(self.fuse);
        w.write_pos(self.position);
        w.write_pos(self.velocity);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetTool {
    pub player_id: u8,
    pub value: u8,
}
impl SetTool {
    pub const ID: ContainedLoaderId = ContainedLoaderId::SetTool;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { player_id: r.read_byte()?, value: r.read_byte()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.value);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetColor {
    pub player_id: u8,
    pub color: (u8, u8, u8),
}
impl SetColor {
    pub const ID: ContainedLoaderId = ContainedLoaderId::SetColor;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { player_id: r.read_byte()?, color: r.read_color()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_color(self.color);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockAction {
    pub player_id: u8,
    pub value: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}
impl BlockAction {
    pub const ID: ContainedLoaderId = ContainedLoaderId::BlockAction;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            value: r.read_byte()?,
            x: r.read_long()?,
            y: r.read_long()?,
            z: r.read_long()?,
        })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.value);
        w.write_long(self.x);
        w.write_long(self.y);
        w.write_long(self.z);
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub player_id: u8,
    pub chat_type: u8,
    pub value: String,
}
impl ChatMessage {
    pub const ID: ContainedLoaderId = ContainedLoaderId::ChatMessage;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self {
            player_id: r.read_byte()?,
            chat_type: r.read_byte()?,
            value: r.read_string()?,
        })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.chat_type);
        w.write_string(&self.value);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FogColor {
    pub color: (u8, u8, u8),
}
impl FogColor {
    pub const ID: ContainedLoaderId = ContainedLoaderId::FogColor;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { color: r.read_color()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_color(self.color);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeWeapon {
    pub player_id: u8,
    pub weapon: u8,
}
impl ChangeWeapon {
    pub const ID: ContainedLoaderId = ContainedLoaderId::ChangeWeapon;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { player_id: r.read_byte()?, weapon: r.read_byte()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.weapon);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeTeam {
    pub player_id: u8,
    pub team: u8,
}
impl ChangeTeam {
    pub const ID: ContainedLoaderId = ContainedLoaderId::ChangeTeam;
    pub fn decode(r: &mut PacketReader) -> WireResult<Self> {
        Ok(Self { player_id: r.read_byte()?, team: r.read_byte()? })
    }
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.team);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KillAction {
    pub player_id: u8,
    pub killer_id: u8,
    pub kill_type: u8,
}
impl KillAction {
    pub const ID: ContainedLoaderId = ContainedLoaderId::KillAction;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.killer_id);
        w.write_byte(self.kill_type);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerLeft {
    pub player_id: u8,
}
impl PlayerLeft {
    pub const ID: ContainedLoaderId = ContainedLoaderId::PlayerLeft;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntelPickup {
    pub player_id: u8,
}
impl IntelPickup {
    pub const ID: ContainedLoaderId = ContainedLoaderId::IntelPickup;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntelDrop {
    pub player_id: u8,
    pub position: Vec3,
}
impl IntelDrop {
    pub const ID: ContainedLoaderId = ContainedLoaderId::IntelDrop;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_pos(self.position);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntelCapture {
    pub player_id: u8,
    pub winning: bool,
}
impl IntelCapture {
    pub const ID: ContainedLoaderId = ContainedLoaderId::IntelCapture;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_byte(self.winning as u8);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Restock;
impl Restock {
    pub const ID: ContainedLoaderId = ContainedLoaderId::Restock;
    pub fn encode(&self, w: &mut PacketWriter) {
        let _ = w;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MoveObject {
    pub entity_tag: u8,
    pub position: Vec3,
}
impl MoveObject {
    pub const ID: ContainedLoaderId = ContainedLoaderId::MoveObject;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.entity_tag);
        w.write_pos(self.position);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetHp {
    pub hp: u8,
    pub not_fall: bool,
    pub hit_indicator: u8,
}
impl SetHp {
    pub const ID: ContainedLoaderId = ContainedLoaderId::SetHp;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.hp);
        w.write_byte(self.not_fall as u8);
        w.write_byte(self.hit_indicator);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MapStart {
    pub size: u32,
}
impl MapStart {
    pub const ID: ContainedLoaderId = ContainedLoaderId::MapStart;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_long(self.size as i32);
    }
}

#[derive(Debug, Clone)]
pub struct MapChunk {
    pub data: Vec<u8>,
}
impl MapChunk {
    pub const ID: ContainedLoaderId = ContainedLoaderId::MapChunk;
    pub fn encode(&self, w: &mut PacketWriter) {
        w.data.extend_from_slice(&self.data);
    }
}


/// Per-team CTF state nested inside `StateData`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CtfTeamState {
    pub score: u32,
    pub base: Vec3,
    pub flag: Vec3,
    pub carrier: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct StateData {
    pub player_id: u8,
    pub fog_color: (u8, u8, u8),
    pub cap_limit: u32,
    pub blue: CtfTeamState,
    pub green: CtfTeamState,
}

impl StateData {
    pub const ID: ContainedLoaderId = ContainedLoaderId::StateData;

    pub fn encode(&self, w: &mut PacketWriter) {
        w.write_byte(self.player_id);
        w.write_color(self.fog_color);
        w.write_long(self.cap_limit as i32);
        for team in [&self.blue, &self.green] {
            w.write_long(team.score as i32);
            w.write_pos(team.base);
            match team.carrier {
                Some(id) => {
                    w.write_byte(1);
                    w.write_byte(id);
                }
                None => {
                    w.write_byte(0);
                    w.write_pos(team.flag);
                }
            }
        }
    }
}
