use super::sequence::MutationState;
use super::{SequencePosition, VariantIndex, VariantSequence, VariantSite};
use std::ops::Index;

/// Holds variant data and associated metadata.
/// This data is used as input for both ancestor generation and matching sample data against the
/// ancestry graph. Only inference sites are indexed by [`VariantIndex`]; sites that cannot be
/// used for inference are kept separately.
#[derive(Clone, Debug)]
pub struct VariantData {
    sites: Vec<VariantSite>,
    excluded: Vec<VariantSite>,
    positions: Vec<SequencePosition>,
    sequence_length: SequencePosition,
    num_samples: usize,
}

impl VariantData {
    /// Construct a new VariantData instance
    pub(super) fn new(
        sites: Vec<VariantSite>,
        excluded: Vec<VariantSite>,
        sequence_length: SequencePosition,
        num_samples: usize,
    ) -> Self {
        let positions = sites.iter().map(|s| s.position).collect();
        Self {
            sites,
            excluded,
            positions,
            sequence_length,
            num_samples,
        }
    }

    /// Convert the variant data into sample data by transposing the inference sites into
    /// [`VariantSequence`]s.
    /// Data is copied, so the variant data object can still be used after this method is called.
    pub fn to_samples(&self) -> SampleData {
        let mut samples =
            vec![VariantSequence::from_ancestral_state(self.sites.len()); self.num_samples];
        for (i, site) in self.sites.iter().enumerate() {
            for (j, state) in site.genotypes.iter().enumerate() {
                samples[j][VariantIndex(i)] = *state;
            }
        }

        SampleData { samples }
    }

    /// Iterate through the [`VariantSite`]s in this instance
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = &VariantSite> + ExactSizeIterator + DoubleEndedIterator + '_ {
        self.sites.iter()
    }

    /// Conveniently iterate through the [`VariantSite`]s in this instance, yielding the
    /// [`VariantIndex`] of the site as well.
    pub(crate) fn iter_with_index(
        &self,
    ) -> impl Iterator<Item = (VariantIndex, &VariantSite)>
           + ExactSizeIterator
           + DoubleEndedIterator
           + '_ {
        self.sites
            .iter()
            .enumerate()
            .map(|(i, s)| (VariantIndex(i), s))
    }

    /// Sites that were rejected for inference (singletons, fixed or multi-allelic sites).
    pub fn excluded_sites(&self) -> &[VariantSite] {
        &self.excluded
    }

    /// Get the array that maps variant indices to sequence positions.
    pub fn variant_positions(&self) -> &[SequencePosition] {
        &self.positions
    }

    /// Number of alleles per inference site
    pub fn num_alleles(&self) -> Vec<u8> {
        self.sites.iter().map(|s| s.num_alleles).collect()
    }

    /// Get the sequence length of the genome this variant data is about. It is not the length of
    /// the variant site vector, but the genome length.
    pub fn get_sequence_length(&self) -> SequencePosition {
        self.sequence_length
    }

    /// Get the number of samples that make up each variant site
    pub fn get_num_samples(&self) -> usize {
        self.num_samples
    }

    /// Get the number of inference sites in the collection
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Index variant data by [`VariantIndex`].
impl Index<VariantIndex> for VariantData {
    type Output = VariantSite;

    fn index(&self, index: VariantIndex) -> &Self::Output {
        &self.sites[index.0]
    }
}

/// A collection of sample haplotypes over the inference sites of a [`VariantData`] instance.
#[derive(Clone, Debug, Default)]
pub struct SampleData {
    samples: Vec<VariantSequence>,
}

impl SampleData {
    /// Create sample data from haplotypes that already span every inference site.
    pub fn from_haplotypes(samples: Vec<Vec<MutationState>>) -> Self {
        Self {
            samples: samples.into_iter().map(VariantSequence::from_vec).collect(),
        }
    }

    /// Iterate over the sample sequences in this instance
    pub fn iter(&self) -> impl Iterator<Item = &VariantSequence> + '_ {
        self.samples.iter()
    }

    /// Get the number of samples in the collection
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turn the sample data into an iterator over its sample sequences
impl IntoIterator for SampleData {
    type Item = VariantSequence;
    type IntoIter = <Vec<Self::Item> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}
