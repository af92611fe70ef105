use crate::config::InferenceConfig;
use crate::error::{Error, Result};
use crate::variants::SequencePosition;

/// Transition and emission parameters of the copying model.
///
/// `recombination[i]` is the probability of switching parents between site `i` and `i + 1`,
/// `mismatch[i]` the probability that the query disagrees with the copied allele at site `i`.
/// All values lie in `[0, 0.5]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RateMap {
    recombination: Vec<f64>,
    mismatch: Vec<f64>,
    num_alleles: Vec<u8>,
}

impl RateMap {
    /// Use the same probabilities between and at every site. All sites are biallelic.
    pub fn constant(num_sites: usize, recombination: f64, mismatch: f64) -> Result<Self> {
        Self::from_arrays(
            vec![recombination; num_sites.saturating_sub(1)],
            vec![mismatch; num_sites],
            vec![2; num_sites],
        )
    }

    /// Use explicit probability arrays. `recombination` must have one entry less than there are
    /// sites, `mismatch` and `num_alleles` one entry per site.
    pub fn from_arrays(
        recombination: Vec<f64>,
        mismatch: Vec<f64>,
        num_alleles: Vec<u8>,
    ) -> Result<Self> {
        let num_sites = mismatch.len();
        if num_alleles.len() != num_sites {
            return Err(Error::RateLength {
                name: "allele count",
                found: num_alleles.len(),
                expected: num_sites,
            });
        }
        if recombination.len() != num_sites.saturating_sub(1) {
            return Err(Error::RateLength {
                name: "recombination",
                found: recombination.len(),
                expected: num_sites.saturating_sub(1),
            });
        }
        check_probabilities("recombination", &recombination)?;
        check_probabilities("mismatch", &mismatch)?;

        Ok(Self {
            recombination,
            mismatch,
            num_alleles,
        })
    }

    /// Derive probabilities from site positions. The genetic distance between adjacent sites is
    /// `d = Δposition · recombination_rate`, which is turned into a recombination probability
    /// with Haldane's map function `(1 − e^(−2d)) / 2`. The mismatch probability of a site with
    /// `k` alleles is `(1 − e^(−d̄ · ratio · k)) / k`, where `d̄` is the mean distance between
    /// sites.
    pub fn from_positions(
        positions: &[SequencePosition],
        recombination_rate: f64,
        mismatch_ratio: f64,
        num_alleles: Vec<u8>,
    ) -> Result<Self> {
        let distances: Vec<f64> = positions
            .windows(2)
            .map(|pair| (pair[1].unwrap() - pair[0].unwrap()) * recombination_rate)
            .collect();
        let mean_distance = if distances.is_empty() {
            0.0
        } else {
            distances.iter().sum::<f64>() / distances.len() as f64
        };

        let recombination = distances
            .iter()
            .map(|&d| (1.0 - (-2.0 * d).exp()) / 2.0)
            .collect();
        let mismatch = num_alleles
            .iter()
            .map(|&k| {
                let k = k as f64;
                (1.0 - (-mean_distance * mismatch_ratio * k).exp()) / k
            })
            .collect();

        Self::from_arrays(recombination, mismatch, num_alleles)
    }

    /// Build the rates an inference run uses for the given sites.
    pub fn from_config(
        config: &InferenceConfig,
        positions: &[SequencePosition],
        num_alleles: Vec<u8>,
    ) -> Result<Self> {
        let mut rates = match config.recombination_rate {
            Some(rate) => Self::from_positions(
                positions,
                rate,
                config.mismatch_ratio.unwrap_or(0.0),
                num_alleles,
            )?,
            None => {
                let num_sites = positions.len();
                Self::from_arrays(
                    vec![config.recombination_probability; num_sites.saturating_sub(1)],
                    vec![config.mismatch_probability; num_sites],
                    num_alleles,
                )?
            }
        };

        if config.mismatch_ratio.is_none() {
            rates.mismatch.fill(config.mismatch_probability);
            check_probabilities("mismatch", &rates.mismatch)?;
        }
        Ok(rates)
    }

    pub fn num_sites(&self) -> usize {
        self.mismatch.len()
    }

    /// Probability of recombining when moving from `site - 1` onto `site`.
    pub fn recombination_into(&self, site: usize) -> f64 {
        self.recombination[site - 1]
    }

    pub fn mismatch(&self, site: usize) -> f64 {
        self.mismatch[site]
    }

    pub fn num_alleles(&self, site: usize) -> u8 {
        self.num_alleles[site]
    }
}

fn check_probabilities(name: &'static str, values: &[f64]) -> Result<()> {
    match values
        .iter()
        .enumerate()
        .find(|(_, &v)| !(v.is_finite() && (0.0..=0.5).contains(&v)))
    {
        Some((index, &value)) => Err(Error::InvalidProbability { name, index, value }),
        None => Ok(()),
    }
}
