use crate::error::{Error, Result};
use crate::variants::sequence::MutationState;
use crate::variants::{SequencePosition, VariantData, VariantSite};
use tracing::debug;

/// How the times of the sites added to a builder are determined. All sites of one builder
/// must use the same source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimeSource {
    Frequency,
    User,
}

/// A builder for [`VariantData`] instances
#[derive(Clone, Debug)]
pub struct VariantDataBuilder {
    sites: Vec<VariantSite>,
    excluded: Vec<VariantSite>,
    num_samples: usize,
    sequence_length: SequencePosition,
    last_position: Option<f64>,
    time_source: Option<TimeSource>,
}

impl VariantDataBuilder {
    /// A new empty builder for a genome with given sequence length
    pub fn new(sequence_length: f64) -> Self {
        Self {
            sites: Vec::default(),
            excluded: Vec::default(),
            num_samples: 0,
            sequence_length: SequencePosition::new(sequence_length),
            last_position: None,
            time_source: None,
        }
    }

    /// Create a builder and add all sites of an iterator, deriving their times from the derived
    /// allele frequency.
    pub fn from_iter(
        sequence_length: f64,
        iter: impl IntoIterator<Item = (Vec<MutationState>, f64)>,
    ) -> Result<Self> {
        let mut builder = Self::new(sequence_length);
        for (state, position) in iter {
            builder.add_variant_site(state, position)?;
        }
        Ok(builder)
    }

    /// Add a variant site to the variant data. If the variant site cannot be used for inference
    /// (for example, if it is a singleton mutation), it is kept aside as an excluded site.
    ///
    /// # Parameters
    /// - `state` a vector of [`MutationState`] values that indicate the variant call for each
    /// sample. The number of samples is inferred from the first state vector added to the builder.
    /// - `position` the position of the mutation site in the reference genome
    ///
    /// # Errors
    /// - if the state vector is empty or its length differs from previously added vectors
    /// - if the position does not follow the previous one or exceeds the sequence length
    /// - if earlier sites were added with user-supplied times
    pub fn add_variant_site(&mut self, state: Vec<MutationState>, position: f64) -> Result<()> {
        self.check_time_source(TimeSource::Frequency)?;
        self.check_site(&state, position)?;
        self.push(VariantSite::new(state, SequencePosition::new(position)));
        Ok(())
    }

    /// Add a variant site with a user-supplied time. The time must be finite and positive, and
    /// all sites of the builder must carry user-supplied times.
    pub fn add_variant_site_with_time(
        &mut self,
        state: Vec<MutationState>,
        position: f64,
        time: f64,
    ) -> Result<()> {
        self.check_time_source(TimeSource::User)?;
        if !time.is_finite() || time <= 0.0 {
            return Err(Error::NonFiniteTime { position, time });
        }
        self.check_site(&state, position)?;
        self.push(VariantSite::with_time(
            state,
            SequencePosition::new(position),
            time,
        ));
        Ok(())
    }

    /// Generate [`VariantData`] from the current builder state.
    pub fn finalize(self) -> VariantData {
        debug!(
            inference_sites = self.sites.len(),
            excluded_sites = self.excluded.len(),
            samples = self.num_samples,
            "finalized variant data"
        );
        VariantData::new(
            self.sites,
            self.excluded,
            self.sequence_length,
            self.num_samples,
        )
    }

    fn check_time_source(&mut self, source: TimeSource) -> Result<()> {
        match self.time_source {
            Some(existing) if existing != source => Err(Error::MixedSiteTimes),
            _ => {
                self.time_source = Some(source);
                Ok(())
            }
        }
    }

    fn check_site(&mut self, state: &[MutationState], position: f64) -> Result<()> {
        if state.is_empty() {
            return Err(Error::EmptySite);
        }

        if self.num_samples == 0 {
            self.num_samples = state.len();
        } else if state.len() != self.num_samples {
            return Err(Error::GenotypeLength {
                position,
                found: state.len(),
                expected: self.num_samples,
            });
        }

        if !position.is_finite() || position < 0.0 || position >= self.sequence_length.unwrap() {
            return Err(Error::PositionOutOfRange {
                position,
                sequence_length: self.sequence_length.unwrap(),
            });
        }

        if let Some(previous) = self.last_position {
            if position <= previous {
                return Err(Error::UnsortedPosition { position, previous });
            }
        }
        self.last_position = Some(position);
        Ok(())
    }

    fn push(&mut self, site: VariantSite) {
        if site.is_inference() {
            self.sites.push(site);
        } else {
            self.excluded.push(site);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_uninformative_sites() {
        let data = VariantDataBuilder::from_iter(
            10.0,
            vec![
                (vec![0, 1, 1, 0], 1.0),
                (vec![0, 1, 0, 0], 2.0),
                (vec![1, 1, 1, 1], 3.0),
                (vec![1, 1, 0, 0], 4.0),
            ],
        )
        .unwrap()
        .finalize();

        assert_eq!(data.len(), 2);
        assert_eq!(data.excluded_sites().len(), 2);
        assert_eq!(data.get_num_samples(), 4);
    }

    #[test]
    fn rejects_malformed_sites() {
        let mut builder = VariantDataBuilder::new(10.0);
        builder.add_variant_site(vec![0, 1, 1], 2.0).unwrap();

        assert!(matches!(
            builder.add_variant_site(vec![0, 1], 3.0),
            Err(Error::GenotypeLength { .. })
        ));
        assert!(matches!(
            builder.add_variant_site(vec![0, 1, 1], 2.0),
            Err(Error::UnsortedPosition { .. })
        ));
        assert!(matches!(
            builder.add_variant_site(vec![0, 1, 1], 10.0),
            Err(Error::PositionOutOfRange { .. })
        ));
        assert!(matches!(
            builder.add_variant_site(vec![], 5.0),
            Err(Error::EmptySite)
        ));
    }

    #[test]
    fn rejects_mixed_times() {
        let mut builder = VariantDataBuilder::new(10.0);
        builder.add_variant_site(vec![0, 1, 1], 2.0).unwrap();
        assert!(matches!(
            builder.add_variant_site_with_time(vec![0, 1, 1], 3.0, 5.0),
            Err(Error::MixedSiteTimes)
        ));

        let mut builder = VariantDataBuilder::new(10.0);
        assert!(matches!(
            builder.add_variant_site_with_time(vec![0, 1, 1], 3.0, f64::NAN),
            Err(Error::NonFiniteTime { .. })
        ));
        builder
            .add_variant_site_with_time(vec![0, 1, 1], 3.0, 5.0)
            .unwrap();
        assert!(matches!(
            builder.add_variant_site(vec![0, 1, 1], 4.0),
            Err(Error::MixedSiteTimes)
        ));
    }
}
