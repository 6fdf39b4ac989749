//! # Register Types
//!
//! Bit-level views of the relay board's register banks.
//!
//! ## Mask Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RegisterMask { value, mask }                                           │
//! │                                                                         │
//! │  bit:    7 6 5 4 3 2 1 0                                                │
//! │  mask:   0 0 0 0 1 1 1 0   ← bits 1..3 are addressed                    │
//! │  value:  0 0 0 0 1 0 1 0   ← bit 1 and 3 on, bit 2 off                  │
//! │                                                                         │
//! │  Bits outside `mask` carry no meaning and are left untouched on the     │
//! │  device by a masked write.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Number of addressable lines per register bank.
pub const REGISTER_BITS: u8 = 8;

// =============================================================================
// Register Id
// =============================================================================

/// Address of a hardware register on the board's serial bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterId(pub u8);

impl RegisterId {
    /// The first output bank.
    pub const OUTPUT_1: RegisterId = RegisterId(1);
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

// =============================================================================
// Register Mask
// =============================================================================

/// Level values for a subset of a bank's 8 lines.
///
/// Only bits set in `mask` are meaningful. Every constructor and mutator here
/// keeps `value` bits outside the mask cleared, so two masks that address the
/// same lines with the same levels compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct RegisterMask {
    pub value: u8,
    pub mask: u8,
}

impl RegisterMask {
    /// Mask that addresses no lines.
    pub const EMPTY: RegisterMask = RegisterMask { value: 0, mask: 0 };

    /// Creates a mask; value bits outside `mask` are discarded.
    #[inline]
    pub const fn new(value: u8, mask: u8) -> Self {
        RegisterMask {
            value: value & mask,
            mask,
        }
    }

    /// Addresses `bit` with the given level. A bit set twice keeps the last level.
    #[inline]
    pub fn set(&mut self, bit: u8, on: bool) {
        debug_assert!(bit < REGISTER_BITS);
        let flag = 1u8 << bit;
        self.mask |= flag;
        if on {
            self.value |= flag;
        } else {
            self.value &= !flag;
        }
    }

    /// Level for `bit`, or `None` if the bit is not addressed.
    #[inline]
    pub fn get(&self, bit: u8) -> Option<bool> {
        if bit >= REGISTER_BITS {
            return None;
        }
        let flag = 1u8 << bit;
        (self.mask & flag != 0).then_some(self.value & flag != 0)
    }

    /// True if no line is addressed.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Applies this mask over a current register value.
    #[inline]
    pub const fn apply_to(&self, current: u8) -> u8 {
        (current & !self.mask) | (self.value & self.mask)
    }

    /// Iterates addressed bits in ascending order as `(bit, level)`.
    pub fn bits(&self) -> impl Iterator<Item = (u8, bool)> + '_ {
        (0..REGISTER_BITS).filter_map(move |bit| self.get(bit).map(|on| (bit, on)))
    }
}

// =============================================================================
// Pulse Request
// =============================================================================

/// Set of output lines to pulse once each. A pulse is an edge, not a level,
/// so there is no value component and an unset bit simply means "leave alone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PulseRequest(u8);

impl PulseRequest {
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        PulseRequest(bits)
    }

    #[inline]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn insert(&mut self, bit: u8) {
        debug_assert!(bit < REGISTER_BITS);
        self.0 |= 1 << bit;
    }

    #[inline]
    pub const fn contains(&self, bit: u8) -> bool {
        bit < REGISTER_BITS && (self.0 >> bit) & 1 == 1
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the requested bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..REGISTER_BITS).filter(move |&bit| self.contains(bit))
    }
}
