use crate::ancestors::AncestralSequence;
use crate::variants::SequencePosition;
use std::ops::{Deref, Range};

/// The ancestral sequences of one inference run, ordered by time descending. The first
/// ancestor is always the root ancestor, and the index of every ancestor is its node id in the
/// ancestry graph.
#[derive(Debug, Clone)]
pub struct AncestorArray {
    ancestors: Vec<AncestralSequence>,

    /// Maps variant indices to sequence positions
    variant_positions: Vec<SequencePosition>,
}

impl AncestorArray {
    pub(crate) fn new(
        ancestors: Vec<AncestralSequence>,
        variant_positions: Vec<SequencePosition>,
    ) -> Self {
        debug_assert!(ancestors
            .windows(2)
            .all(|pair| pair[0].time() >= pair[1].time()));
        Self {
            ancestors,
            variant_positions,
        }
    }

    /// Get the number of inference sites the ancestors span
    pub fn num_sites(&self) -> usize {
        self.variant_positions.len()
    }

    pub fn variant_positions(&self) -> &[SequencePosition] {
        &self.variant_positions
    }

    /// Split the ancestors into epochs: maximal runs of ancestors sharing the same time.
    /// Epochs are returned oldest first, the root ancestor forms the first epoch on its own.
    pub fn epochs(&self) -> Vec<Range<usize>> {
        let mut epochs = Vec::new();
        let mut start = 0;
        for i in 1..=self.ancestors.len() {
            if i == self.ancestors.len() || self.ancestors[i].time() != self.ancestors[start].time()
            {
                epochs.push(start..i);
                start = i;
            }
        }
        epochs
    }
}

impl Deref for AncestorArray {
    type Target = [AncestralSequence];

    fn deref(&self) -> &Self::Target {
        &self.ancestors
    }
}
