use crate::variants::sequence::{MutationState, ANCESTRAL_STATE, DERIVED_STATE, MISSING_STATE};
use crate::variants::SequencePosition;

/// A single variant site defined by the genotype state.
#[derive(Clone, Debug)]
pub struct VariantSite {
    pub(crate) genotypes: Vec<MutationState>,
    // position in the genome
    pub(crate) position: SequencePosition,
    // putative age of this site
    pub(crate) time: f64,
    // number of distinct non-missing alleles observed
    pub(crate) num_alleles: u8,
    pub(crate) is_biallelic: bool,
    pub(crate) is_singleton: bool,
    // every non-missing call carries the derived allele
    pub(crate) is_fixed: bool,
}

impl VariantSite {
    /// Create a new variant site from a vector of genotypes and its position in the genome. The
    /// time of the site is the frequency of the derived allele among the non-missing calls.
    ///
    /// # Parameters
    /// - `genotypes` a vector of `n` allele calls. 0 is the ancestral allele, 1 the derived
    /// allele and [`MISSING_STATE`] a missing call. Any other value makes the site multi-allelic.
    /// - `position` the [`SequencePosition`] of the site in the genome.
    pub fn new(genotypes: Vec<MutationState>, position: SequencePosition) -> Self {
        let mut site = Self::with_time(genotypes, position, 0.0);
        let called = site.genotypes.iter().filter(|&&s| s != MISSING_STATE).count();
        site.time = if called == 0 {
            0.0
        } else {
            site.derived_count() as f64 / called as f64
        };
        site
    }

    /// Create a new variant site with a user-supplied time.
    pub fn with_time(genotypes: Vec<MutationState>, position: SequencePosition, time: f64) -> Self {
        let mut seen = [false; 256];
        let mut derived = 0;
        let mut ancestral = 0;
        for &state in genotypes.iter().filter(|&&s| s != MISSING_STATE) {
            seen[state as usize] = true;
            match state {
                DERIVED_STATE => derived += 1,
                ANCESTRAL_STATE => ancestral += 1,
                _ => {}
            }
        }

        let num_alleles = seen.iter().filter(|&&s| s).count().max(2) as u8;
        let is_biallelic = seen.iter().skip(2).all(|&s| !s);
        VariantSite {
            genotypes,
            position,
            time,
            num_alleles,
            is_biallelic,
            is_singleton: derived < 2,
            is_fixed: ancestral == 0,
        }
    }

    /// Whether the site takes part in ancestor inference and matching. Only biallelic sites
    /// with at least two derived and one ancestral carrier are informative.
    pub fn is_inference(&self) -> bool {
        self.is_biallelic && !self.is_singleton && !self.is_fixed
    }

    pub fn position(&self) -> SequencePosition {
        self.position
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn num_alleles(&self) -> u8 {
        self.num_alleles
    }

    pub fn genotypes(&self) -> &[MutationState] {
        &self.genotypes
    }

    /// Number of samples carrying the derived allele.
    pub(crate) fn derived_count(&self) -> usize {
        self.genotypes.iter().filter(|&&s| s == DERIVED_STATE).count()
    }
}
