//! Shared primitives for the CTF server core: the wire codec, loader ids,
//! small data structures (id pool, sliding window, multi-key index), and
//! the error taxonomy. Kept free of any gameplay policy — that lives in
//! `ctf-server`.

pub mod error;
pub mod id_pool;
pub mod loader_id;
pub mod math;
pub mod multi_key_index;
pub mod sliding_window;
pub mod veto;
pub mod wire;

pub use error::{ConfigError, ConfigResult, WireError, WireResult};
pub use id_pool::IdPool;
pub use loader_id::{BlockActionKind, ContainedLoaderId, LoaderId, CONNECTIONLESS, SYSTEM_SENDER_ID};
pub use math::Vec3;
pub use multi_key_index::{uniquify_name, MultiKeyIndex};
pub use sliding_window::SlidingWindow;
pub use veto::Veto;
pub use wire::{PacketReader, PacketWriter};
