//! Static round-robin partition arithmetic.
//!
//! Lane `k` of `L` owns exactly the sequence numbers `{k, k+L, k+2L, ...}`.
//! Ownership is pure arithmetic, with no coordination between lanes, which
//! is what lets the lanes run fully in parallel, contending only on the
//! shared tracker.

/// The next sequence number a lane should consume.
///
/// With no cursor the lane starts at its own id; afterwards it strides by
/// the lane count.
pub fn next_sequence(lane: u32, total_lanes: u32, last_consumed: Option<u64>) -> u64 {
    match last_consumed {
        None => u64::from(lane),
        Some(last) => last + u64::from(total_lanes),
    }
}

/// The lane that owns a sequence number.
pub fn owning_lane(sequence: u64, total_lanes: u32) -> u32 {
    (sequence % u64::from(total_lanes)) as u32
}
