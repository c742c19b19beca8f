//! Re-exports the shared vector helpers so the rest of this crate can
//! `use crate::math::Vec3` the way the teacher modules `use q_shared::*`.

pub use ctf_common::math::*;
