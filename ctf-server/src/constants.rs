//! Tuning constants named by spec.md but not pinned to a specific number
//! there. The retrieved original-source excerpt imports these from a
//! sibling `constants` module that was not part of the retrieval pack, so
//! the numeric values below are this port's own choice — see DESIGN.md
//! "Open Questions" for the reasoning. Everything that *is* pinned by the
//! spec text itself (the 128-unit orientation radius, the z>=62 bedrock
//! line, the [0,512]x[0,512]x[0,63] world box, the -5 block overdraft) is
//! reproduced exactly.

/// Recipients farther than this from the sender never see an orientation
/// broadcast.
pub const ORIENTATION_DISTANCE: f32 = 128.0;
pub const ORIENTATION_DISTANCE_SQUARED: f32 = ORIENTATION_DISTANCE * ORIENTATION_DISTANCE;

/// Rubber-band thresholds: exceeding these on a
/// PositionData triggers a server-authoritative resend instead of an
/// accepted move.
pub const RUBBERBAND_DISTANCE: f32 = 8.0;
pub const RUBBERBAND_DISTANCE_Z: f32 = 16.0;

/// Number of (client_timer, server_seconds) samples the speed-hack window
/// holds before it starts evaluating a ratio.
pub const TIMER_WINDOW_ENTRIES: usize = 5;

/// Ratio of client-reported time delta to server wall-clock delta above
/// which a speed-hack is reported.
pub const MAX_TIMER_SPEED: f64 = 1.15;

/// Number of over-fast BlockAction timestamps the rapid-fire window holds.
pub const RAPID_WINDOW_ENTRIES: usize = 5;

/// If the window's oldest-to-newest span is under this many seconds once
/// full, a rapid-fire hack is reported.
pub const MAX_RAPID_SPEED: f64 = 3.0;

/// z coordinate at and above which terrain is indestructible bedrock.
pub const BEDROCK_Z: i32 = 62;

/// World bounding box grenades and entities must stay within.
pub const WORLD_MAX_X: f32 = 512.0;
pub const WORLD_MAX_Y: f32 = 512.0;
pub const WORLD_MAX_Z: f32 = 63.0;

/// Jump is only honored while z-acceleration sits in this "on ground"
/// window.
pub const GROUND_ACCEL_MIN: f32 = 0.0;
pub const GROUND_ACCEL_MAX: f32 = 0.017;

/// Block budget may run this far negative before a build is rejected.
pub const MIN_BLOCK_BUDGET: i32 = -5;

pub const STARTING_HP: i32 = 100;
pub const STARTING_GRENADES: u8 = 2;
pub const STARTING_BLOCKS: i32 = 50;

/// Longest a single chat line may be before wrapping (minus any prefix).
pub const MAX_CHAT_SIZE: usize = 90;

/// Map transfer: bytes per chunk and how many chunks may be in flight at
/// once.
pub const MAP_CHUNK_SIZE: usize = 1024;
pub const MAP_CHUNKS_IN_FLIGHT: usize = 4;

/// Minimum per-tool/per-weapon interval between BlockAction packets, in
/// seconds, indexed by `Tool`.
pub const TOOL_INTERVAL_SECS: [f64; 4] = [
    1.0,  // Spade
    0.5,  // Block (build/destroy)
    0.1,  // Weapon (overridden per-weapon below)
    0.5,  // Grenade
];

/// Per-weapon fire interval, seconds, used instead of `TOOL_INTERVAL_SECS`
/// when `tool == Tool::Weapon`.
pub const WEAPON_INTERVAL_SECS: [f64; 3] = [
    0.5,  // Rifle
    0.1,  // Smg
    1.0,  // Shotgun
];

/// Damage dealt by each weapon against each hit zone: `HIT_VALUES[weapon][zone]`.
pub const HIT_VALUES: [[i32; 4]; 3] = [
    // Torso, Head, Arms, Legs
    [49, 100, 33, 33], // Rifle
    [29, 75, 18, 18],  // Smg
    [60, 90, 40, 40],  // Shotgun (per-pellet value, applied once per hit here)
];

/// Fixed world tick cadence.
pub const UPDATE_FREQUENCY_HZ: f64 = 60.0;
