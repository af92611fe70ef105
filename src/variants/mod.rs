use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

mod builder;
mod data;
mod sequence;
mod site;

pub use builder::VariantDataBuilder;
pub use data::{SampleData, VariantData};
pub use sequence::{MutationState, VariantSequence, ANCESTRAL_STATE, DERIVED_STATE, MISSING_STATE};
pub use site::VariantSite;

/// A position in a DNA sequence. This newtype ensures that sequence positions and variant
/// indices (indices into the variant site vector) aren't mixed up.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct SequencePosition(f64);

impl SequencePosition {
    /// Create a new sequence position from a raw coordinate.
    pub fn new(position: f64) -> Self {
        Self(position)
    }

    /// Create a new sequence position from a usize.
    pub fn from_usize(position: usize) -> Self {
        Self(position as f64)
    }

    /// Get the underlying coordinate of the sequence position.
    pub fn unwrap(&self) -> f64 {
        self.0
    }
}

impl Display for SequencePosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An index into the [`VariantData`]. The new-type guarantees that variant indices aren't mixed up
/// with [`SequencePosition`].
#[derive(
    Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct VariantIndex(pub(crate) usize);

impl VariantIndex {
    /// Create a new variant index from a raw index.
    pub fn from_usize(index: usize) -> Self {
        Self(index)
    }

    /// Calculate the distance in variants between this index and another. Does not return the
    /// distance in sequence bases.
    pub(crate) fn get_variant_distance(&self, other: VariantIndex) -> usize {
        self.0.abs_diff(other.0)
    }

    /// Get the underlying usize value of the variant index.
    pub fn unwrap(&self) -> usize {
        self.0
    }
}

impl Display for VariantIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<usize> for VariantIndex {
    type Output = VariantIndex;

    fn add(self, rhs: usize) -> Self::Output {
        VariantIndex(self.0 + rhs)
    }
}

impl Sub for VariantIndex {
    type Output = usize;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl Sub<usize> for VariantIndex {
    type Output = VariantIndex;

    fn sub(self, rhs: usize) -> Self::Output {
        VariantIndex(self.0 - rhs)
    }
}
