use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameters of an inference run. Every field has a default, so a partially specified
/// configuration can be deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Number of matching workers per round. Zero matches synchronously on the calling thread.
    pub num_threads: usize,
    /// Merge identical copying paths into shared nodes when committing.
    pub path_compression: bool,
    /// Recombination rate per unit of sequence length. If unset, the constant
    /// `recombination_probability` is used between every pair of adjacent sites.
    pub recombination_rate: Option<f64>,
    pub recombination_probability: f64,
    /// Ratio of mismatch to recombination, applied to the mean genetic distance between sites.
    /// Needs `recombination_rate`. If unset, the constant `mismatch_probability` is used at
    /// every site.
    pub mismatch_ratio: Option<f64>,
    pub mismatch_probability: f64,
    /// Significant digits kept of every likelihood after each site.
    pub precision: u32,
    /// Match every haplotype a second time with the uncompressed reference engine and fail on
    /// any difference. Slow.
    pub extended_checks: bool,
    /// Ancestor extension stops once fewer than this fraction of the focal carriers remain
    /// consistent with the ancestor.
    pub min_carrier_fraction: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            path_compression: true,
            recombination_rate: None,
            recombination_probability: 1e-2,
            mismatch_ratio: None,
            mismatch_probability: 1e-20,
            precision: 13,
            extended_checks: false,
            min_carrier_fraction: 0.5,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        check_probability("recombination", self.recombination_probability)?;
        check_probability("mismatch", self.mismatch_probability)?;

        for (name, value) in [
            ("recombination_rate", self.recombination_rate),
            ("mismatch_ratio", self.mismatch_ratio),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "{name} must be finite and non-negative, got {value}"
                    )));
                }
            }
        }

        if self.mismatch_ratio.is_some() && self.recombination_rate.is_none() {
            return Err(Error::InvalidConfig(
                "mismatch_ratio needs a recombination_rate".to_string(),
            ));
        }

        if !(1..=17).contains(&self.precision) {
            return Err(Error::InvalidConfig(format!(
                "precision must be between 1 and 17 digits, got {}",
                self.precision
            )));
        }

        if !(0.0..1.0).contains(&self.min_carrier_fraction) {
            return Err(Error::InvalidConfig(format!(
                "min_carrier_fraction must be in [0, 1), got {}",
                self.min_carrier_fraction
            )));
        }
        Ok(())
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=0.5).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidProbability {
            name,
            index: 0,
            value,
        })
    }
}
