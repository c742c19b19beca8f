//! NaN guard, rubber-band correction, speed-hack and rapid-fire
//! detection, and the jump gate.
//!
//! These are pure functions over the anti-cheat state rather than
//! methods that reach into a session, so they can be unit tested without
//! a full `Session`/`GameServer` in scope.

use ctf_common::SlidingWindow;

use crate::constants::{
    GROUND_ACCEL_MAX, GROUND_ACCEL_MIN, MAX_RAPID_SPEED, MAX_TIMER_SPEED, RUBBERBAND_DISTANCE,
    RUBBERBAND_DISTANCE_Z,
};
use crate::math::{is_finite, Vec3};

/// Outcome of a rubber-band check on an incoming PositionData.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionCheck {
    /// Accept the reported position.
    Accept,
    /// Reject the move; the session must be resynced to `authoritative`.
    Reject { authoritative: Vec3 },
}

/// True if every coordinate is finite. A non-finite value silently
/// drops the packet and signals `on_hack_attempt` at the call site.
pub fn is_valid_coordinate(v: Vec3) -> bool {
    is_finite(v)
}

/// Compares a freshly reported position against the server's current
/// position for the same character. `speedhack_detect` gates the check
/// entirely — when off, any reported position is accepted verbatim.
pub fn check_rubber_band(current: Vec3, reported: Vec3, speedhack_detect: bool) -> PositionCheck {
    if !speedhack_detect {
        return PositionCheck::Accept;
    }
    let dx = (reported[0] - current[0]).abs();
    let dy = (reported[1] - current[1]).abs();
    let dz = (reported[2] - current[2]).abs();
    if dx > RUBBERBAND_DISTANCE || dy > RUBBERBAND_DISTANCE || dz > RUBBERBAND_DISTANCE_Z {
        PositionCheck::Reject { authoritative: current }
    } else {
        PositionCheck::Accept
    }
}

/// Records a (client_timer, server_seconds) sample and reports whether
/// this trips the speed-hack threshold. Only meaningful once `window` is
/// full — spec.md §4.2 computes the ratio only at that point.
pub fn check_speedhack(window: &mut SlidingWindow, client_timer: f64, server_seconds: f64) -> bool {
    window.push(client_timer, server_seconds);
    if !window.is_full() {
        return false;
    }
    let (start_timer, start_seconds) = window.oldest().expect("window full implies non-empty");
    let (end_timer, end_seconds) = window.newest().expect("window full implies non-empty");
    let server_span = end_seconds - start_seconds;
    if server_span <= 0.0 {
        return false;
    }
    let ratio = (end_timer - start_timer) / server_span;
    ratio > MAX_TIMER_SPEED
}

/// Records a BlockAction timestamp that violated its tool/weapon
/// interval and reports whether the rapid-fire window has tripped.
pub fn check_rapid_fire(window: &mut SlidingWindow, server_seconds: f64) -> bool {
    window.push(server_seconds, server_seconds);
    if !window.is_full() {
        return false;
    }
    let span = window.timestamp_span().expect("window full implies a span");
    span < MAX_RAPID_SPEED
}

/// Jump is only honored while the character is on the ground, detected
/// via a small positive z-acceleration window.
pub fn jump_allowed(z_acceleration: f32) -> bool {
    (GROUND_ACCEL_MIN..GROUND_ACCEL_MAX).contains(&z_acceleration)
}
