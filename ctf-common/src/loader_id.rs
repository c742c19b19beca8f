//! Stable one-byte loader ids, per spec.md §6.
//!
//! These identify the tagged payloads carried by the Transport's framed
//! datagrams. Bit layouts of individual loaders are fixed by
//! compatibility with the existing client; this core only switches on
//! the id.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoaderId {
    ConnectionRequest = 0,
    ConnectionResponse = 1,
    Disconnect = 2,
    Ping = 3,
    Packet10NoOp = 4,
    SizedData = 5,
    SizedSequenceData = 6,
}

impl LoaderId {
    pub fn from_byte(b: u8) -> Option<Self> {
        use LoaderId::*;
        Some(match b {
            0 => ConnectionRequest,
            1 => ConnectionResponse,
            2 => Disconnect,
            3 => Ping,
            4 => Packet10NoOp,
            5 => SizedData,
            6 => SizedSequenceData,
            _ => return None,
        })
    }
}

/// Ids of loaders carried *inside* a Sized/SizedSequence envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContainedLoaderId {
    ExistingPlayer = 0,
    CreatePlayer = 1,
    PositionData = 2,
    OrientationData = 3,
    InputData = 4,
    WeaponReload = 5,
    HitPacket = 6,
    GrenadePacket = 7,
    SetTool = 8,
    SetColor = 9,
    BlockAction = 10,
    ChatMessage = 11,
    FogColor = 12,
    ChangeWeapon = 13,
    ChangeTeam = 14,
    KillAction = 15,
    PlayerLeft = 16,
    IntelPickup = 17,
    IntelDrop = 18,
    IntelCapture = 19,
    Restock = 20,
    MoveObject = 21,
    SetHp = 22,
    MapStart = 23,
    MapChunk = 24,
    StateData = 25,
}

impl ContainedLoaderId {
    pub fn from_byte(b: u8) -> Option<Self> {
        use ContainedLoaderId::*;
        Some(match b {
            0 => ExistingPlayer,
            1 => CreatePlayer,
            2 => PositionData,
            3 => OrientationData,
            4 => InputData,
            5 => WeaponReload,
            6 => HitPacket,
            7 => GrenadePacket,
            8 => SetTool,
            9 => SetColor,
            10 => BlockAction,
            11 => ChatMessage,
            12 => FogColor,
            13 => ChangeWeapon,
            14 => ChangeTeam,
            15 => KillAction,
            16 => PlayerLeft,
            17 => IntelPickup,
            18 => IntelDrop,
            19 => IntelCapture,
            20 => Restock,
            21 => MoveObject,
            22 => SetHp,
            23 => MapStart,
            24 => MapChunk,
            25 => StateData,
            _ => return None,
        })
    }
}

/// Sentinel connection-id meaning "no session yet" — a payload with this
/// header connection-id creates a new Session rather than looking one up.
pub const CONNECTIONLESS: u32 = 0xffff_ffff;

/// Reserved out-of-range player id used for server-origin chat notices.
pub const SYSTEM_SENDER_ID: i32 = 34;

/// Block action sub-types, per spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockActionKind {
    Build = 0,
    Destroy = 1,
    SpadeDestroy = 2,
    GrenadeDestroy = 3,
}

impl BlockActionKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        use BlockActionKind::*;
        Some(match b {
            0 => Build,
            1 => Destroy,
            2 => SpadeDestroy,
            3 => GrenadeDestroy,
            _ => return None,
        })
    }
}
