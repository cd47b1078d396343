//! Volume size policy
//!
//! Requested capacities are raised to a minimum floor and then rounded up
//! to the allocation unit. Flooring happens first: the floor and the
//! alignment need not be commensurate, and only this order guarantees a
//! result that is both above the floor and aligned.

use tracing::info;

/// Allocation unit: every volume size is a multiple of 2 MiB
pub const SIZE_ALIGNMENT: i64 = 2 * 1024 * 1024;

/// Smallest volume the driver provisions: 10 MiB
pub const MINIMAL_VOLUME_SIZE: i64 = 10 * 1024 * 1024;

/// Round `size` up to the next multiple of [`SIZE_ALIGNMENT`].
///
/// Non-positive sizes map to one alignment unit. Returns `None` only when
/// rounding would overflow `i64`.
pub fn round_up_size(size: i64) -> Option<i64> {
    if size <= 0 {
        return Some(SIZE_ALIGNMENT);
    }
    let remainder = size % SIZE_ALIGNMENT;
    if remainder == 0 {
        return Some(size);
    }
    (size - remainder).checked_add(SIZE_ALIGNMENT)
}

/// Byte count actually honored for a request of `requested` bytes.
///
/// A missing or zero request counts as `0`.
pub fn effective_size(requested: i64) -> Option<i64> {
    let floored = if requested < MINIMAL_VOLUME_SIZE {
        info!(
            "requested capacity {} is smaller than minimal capacity {}, enforcing minimal capacity",
            requested, MINIMAL_VOLUME_SIZE
        );
        MINIMAL_VOLUME_SIZE
    } else {
        requested
    };
    round_up_size(floored)
}
