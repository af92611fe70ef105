use std::fmt::{Debug, Formatter};
use std::ops::{Index, IndexMut};

use crate::variants::{MutationState, VariantIndex, VariantSequence, MISSING_STATE};

mod ancestor_array;
mod generator;

pub use ancestor_array::AncestorArray;
pub use generator::AncestorGenerator;

/// Describes an ancestor before its haplotype is synthesized: the time shared by its focal sites
/// and the focal sites themselves. Only the root ancestor has no focal sites.
#[derive(Clone, Debug, PartialEq)]
pub struct AncestorDescriptor {
    pub time: f64,
    pub focal_sites: Vec<VariantIndex>,
}

/// A DNA sequence expressed through a vector where each entry defines whether the DNA sequence at
/// the given site has the ancestral state, the derived state, or could not be inferred.
/// The vector spans all inference sites, but only the interval `[start, end)` carries data.
#[derive(Clone)]
pub struct AncestralSequence {
    state: VariantSequence,
    focal_sites: Vec<VariantIndex>,
    /// start of valid data in the state vector, inclusive
    start: VariantIndex,
    /// end of valid data in the state vector, exclusive
    end: VariantIndex,
    time: f64,
}

impl AncestralSequence {
    fn from_ancestral_state(len: usize, time: f64) -> Self {
        AncestralSequence {
            state: VariantSequence::from_ancestral_state(len),
            focal_sites: Vec::new(),
            start: VariantIndex(0),
            end: VariantIndex(len),
            time,
        }
    }

    /// Get the haplotype sequence for the ancestral sequence. This sequence starts at the first
    /// known site and ends at the last known site. Where this sequence is located in the genome
    /// is defined by [`start`] and [`end`] respectively.
    /// This means that the indices of the haplotype sequence do not correspond to the indices of
    /// the genome.
    ///
    /// [`start`]: Self::start
    /// [`end`]: Self::end
    pub fn haplotype(&self) -> &[MutationState] {
        &self.state[self.start..self.end]
    }

    /// The state vector over all sites. Entries outside of `[start, end)` are meaningless.
    pub(crate) fn full_state(&self) -> &[MutationState] {
        &self.state
    }

    /// Get the position of the first known site (inclusive), regarding the genome's variant site
    /// vector (so it doesn't necessarily correspond to the actual position in the genome).
    pub fn start(&self) -> VariantIndex {
        self.start
    }

    /// Get the position of the last known site (exclusive).
    pub fn end(&self) -> VariantIndex {
        self.end
    }

    pub fn focal_sites(&self) -> &[VariantIndex] {
        &self.focal_sites
    }

    /// Get the inferred time of the ancestral sequence. This is the time of the focal sites
    /// that were used to infer this ancestor.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Get the length of the ancestral sequence. Only known sites are considered, so the length
    /// might be shorter than the length of the underlying DNA sequence.
    pub fn len(&self) -> usize {
        self.end.get_variant_distance(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Debug for AncestralSequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("AncestralSequence { ")?;
        f.write_fmt(format_args!(
            "time={}, focal_sites={:?},\t",
            self.time, self.focal_sites
        ))?;

        f.write_str("genotype=[ ")?;
        for (idx, b) in self.state.iter().enumerate() {
            if idx < self.start.0 || idx >= self.end.0 {
                f.write_str("-")?;
            } else if *b == MISSING_STATE {
                f.write_str("?")?;
            } else {
                f.write_fmt(format_args!("{}", b))?;
            }

            if idx + 1 < self.state.len() {
                f.write_str(", ")?;
            }
        }
        f.write_str(" ] }")?;
        Ok(())
    }
}

impl Index<VariantIndex> for AncestralSequence {
    type Output = MutationState;

    fn index(&self, index: VariantIndex) -> &Self::Output {
        &self.state[index]
    }
}

impl IndexMut<VariantIndex> for AncestralSequence {
    fn index_mut(&mut self, index: VariantIndex) -> &mut Self::Output {
        &mut self.state[index]
    }
}
