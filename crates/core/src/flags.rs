//! Named bit flags that classify the physical role of a node.
//!
//! A [`Flags`] value is a fixed-width bit set; the meaning of each bit comes
//! from a [`FlagRegistry`], which maps stable names to bit positions and can
//! grow while a model is alive. [`TypeSpec`] expresses flag queries and
//! [`FlagSerializer`] packs flags compactly while keeping them readable under
//! a later registry.

mod registry;
mod serializer;

use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::FlagRegistry;
pub use serializer::{FLAG_SERIALIZER_VERSION, FlagColumn, FlagSerializer};

/// Maximum number of distinct flag names a registry can hold.
pub const MAX_FLAGS: usize = 256;

const WORDS: usize = MAX_FLAGS / 64;

/// Errors raised by flag registration, parsing, and unpacking.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagError {
    #[error("unknown flag `{0}`")]
    Unknown(String),

    #[error("invalid flag name `{0}`")]
    InvalidName(String),

    #[error("cannot register `{0}`: the registry already holds {MAX_FLAGS} flags")]
    CapacityExceeded(String),

    #[error("unsupported flag serialization version `{0}`")]
    UnsupportedVersion(String),

    #[error("packed flag row {row} has {found} bytes, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// A set of flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Flags([u64; WORDS]);

impl Flags {
    /// The set with no bits.
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; WORDS])
    }

    /// Returns a set containing only `bit`, or `None` if `bit` is out of range.
    #[must_use]
    pub fn from_bit(bit: usize) -> Option<Self> {
        let mut flags = Self::empty();
        flags.insert_bit(bit).then_some(flags)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0.iter().all(|&word| word == 0)
    }

    /// Returns `true` if every bit of `other` is also set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        !(self & other).is_empty()
    }

    #[must_use]
    pub fn has_bit(self, bit: usize) -> bool {
        bit < MAX_FLAGS && self.0[bit / 64] & (1 << (bit % 64)) != 0
    }

    /// Sets `bit`, returning `false` if it is out of range.
    pub fn insert_bit(&mut self, bit: usize) -> bool {
        if bit >= MAX_FLAGS {
            return false;
        }
        self.0[bit / 64] |= 1 << (bit % 64);
        true
    }

    /// Iterates over the positions of set bits in ascending order.
    pub fn bits(self) -> impl Iterator<Item = usize> {
        (0..MAX_FLAGS).filter(move |&bit| self.has_bit(bit))
    }

    /// Returns byte `index` of the little-endian representation.
    pub(crate) fn byte(self, index: usize) -> u8 {
        let word = self.0[index / 8];
        // Truncation keeps exactly the addressed byte.
        #[allow(clippy::cast_possible_truncation)]
        let byte = (word >> (8 * (index % 8))) as u8;
        byte
    }

    pub(crate) fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut words = [0_u64; WORDS];
        for (index, &byte) in bytes.iter().take(MAX_FLAGS / 8).enumerate() {
            words[index / 8] |= u64::from(byte) << (8 * (index % 8));
        }
        Self(words)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let mut out = self;
        out |= rhs;
        out
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        for (mine, theirs) in self.0.iter_mut().zip(rhs.0) {
            *mine |= theirs;
        }
    }
}

impl BitAnd for Flags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        let mut out = self;
        for (mine, theirs) in out.0.iter_mut().zip(rhs.0) {
            *mine &= theirs;
        }
        out
    }
}

/// A flag query: a single combination, or alternatives matched with OR.
///
/// The null spec ([`TypeSpec::Any`], an empty combination, or an empty list
/// of alternatives) matches everything in a non-exact query and nothing in an
/// exact one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeSpec {
    #[default]
    Any,
    One(Flags),
    AnyOf(Vec<Flags>),
}

impl TypeSpec {
    /// Returns `true` if this spec places no constraint.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Any => true,
            Self::One(flags) => flags.is_empty(),
            Self::AnyOf(alternatives) => alternatives.is_empty(),
        }
    }

    /// Tests `flags` against this spec.
    ///
    /// An exact match requires bit-for-bit equality with one alternative; a
    /// non-exact match requires `flags` to be a superset of one alternative.
    #[must_use]
    pub fn matches(&self, flags: Flags, exact: bool) -> bool {
        if self.is_null() {
            return !exact;
        }
        let test = |spec: &Flags| {
            if exact {
                flags == *spec
            } else {
                flags.contains(*spec)
            }
        };
        match self {
            Self::Any => !exact,
            Self::One(spec) => test(spec),
            Self::AnyOf(alternatives) => alternatives.iter().any(test),
        }
    }
}

impl From<Flags> for TypeSpec {
    fn from(flags: Flags) -> Self {
        Self::One(flags)
    }
}

impl From<Vec<Flags>> for TypeSpec {
    fn from(alternatives: Vec<Flags>) -> Self {
        Self::AnyOf(alternatives)
    }
}

impl From<&[Flags]> for TypeSpec {
    fn from(alternatives: &[Flags]) -> Self {
        Self::AnyOf(alternatives.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(positions: &[usize]) -> Flags {
        positions.iter().fold(Flags::empty(), |acc, &bit| {
            acc | Flags::from_bit(bit).unwrap()
        })
    }

    #[test]
    fn bits_above_64_are_addressable() {
        let flags = bits(&[3, 70, 255]);
        assert!(flags.has_bit(70));
        assert!(flags.has_bit(255));
        assert_eq!(flags.bits().collect::<Vec<_>>(), vec![3, 70, 255]);
        assert!(Flags::from_bit(MAX_FLAGS).is_none());
    }

    #[test]
    fn little_endian_bytes_round_trip_partial_width() {
        let flags = bits(&[0, 9, 66]);
        let bytes: Vec<u8> = (0..9).map(|i| flags.byte(i)).collect();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 2);
        assert_eq!(bytes[8], 4);
        assert_eq!(Flags::from_le_bytes(&bytes), flags);
    }

    #[test]
    fn non_exact_match_requires_superset() {
        let node = bits(&[1, 2]);
        assert!(TypeSpec::One(bits(&[1])).matches(node, false));
        assert!(!TypeSpec::One(bits(&[1, 3])).matches(node, false));
        assert!(!TypeSpec::One(bits(&[1])).matches(node, true));
        assert!(TypeSpec::One(bits(&[1, 2])).matches(node, true));
    }

    #[test]
    fn alternatives_use_or_semantics() {
        let node = bits(&[5]);
        let spec = TypeSpec::from(vec![bits(&[4]), bits(&[5])]);
        assert!(spec.matches(node, false));
        assert!(spec.matches(node, true));
        assert!(!TypeSpec::from(vec![bits(&[4]), bits(&[6])]).matches(node, false));
    }

    #[test]
    fn null_spec_matches_everything_unless_exact() {
        let node = bits(&[7]);
        for spec in [
            TypeSpec::Any,
            TypeSpec::One(Flags::empty()),
            TypeSpec::AnyOf(Vec::new()),
        ] {
            assert!(spec.matches(node, false));
            assert!(spec.matches(Flags::empty(), false));
            assert!(!spec.matches(node, true));
            assert!(!spec.matches(Flags::empty(), true));
        }
    }
}
