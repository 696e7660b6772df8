//! Toy-based frequentist calibration of the discovery test statistic.
//!
//! Pseudo-datasets are drawn at the null (and optionally alternate) generation
//! point and evaluated with the same test statistic as the observed data.
//!
//! - Toy `i` of an ensemble with base seed `s` draws from [`toy_seed`]`(s, i)`,
//!   a SplitMix64 mix of both, so neighbouring base seeds share no toys and
//!   results do not depend on thread count. The alternate ensemble uses base
//!   seed `s + 1_000_000_000`.
//! - Toys run in parallel on the current rayon pool; order is preserved.
//! - Any toy error aborts the run.

use crate::profile_likelihood::{ProfileLikelihoodTestStat, TestStatisticResult, null_poi_value};
use ds_core::{
    Dataset, Error, FittingService, GenerateMode, GenerateOptions, ModelConfig, ParameterSet,
    Result,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Seed offset between the null and alternate ensembles.
pub const ALT_SEED_OFFSET: u64 = 1_000_000_000;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator seed of toy `index` in the ensemble with base seed `seed`.
pub fn toy_seed(seed: u64, index: u64) -> u64 {
    splitmix64(splitmix64(seed).wrapping_add(index))
}

/// Standard-normal quantile `Z = Φ⁻¹(1 - p)`.
pub fn significance_from_p_value(p: f64) -> f64 {
    std::f64::consts::SQRT_2 * statrs::function::erf::erfc_inv(2.0 * p)
}

/// Fraction of `samples` at or above `observed`; NaN for an empty sample.
pub fn empirical_p_value(samples: &[f64], observed: f64) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().filter(|&&t| t >= observed).count() as f64 / samples.len() as f64
}

/// Empirical p-value and significance of an observed statistic.
///
/// When no sample reaches `observed`, only `p < 1/n` is known, so the
/// significance is reported at `p = 1/n` and flagged as a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmpiricalSignificance {
    /// Fraction of samples at or above the observed value
    pub p_value: f64,
    /// Significance, finite whenever the sample is non-empty
    pub significance: f64,
    /// `significance` is a lower bound from `p < 1/n`
    pub lower_bound: bool,
}

impl EmpiricalSignificance {
    /// Right-tail significance of `observed` against `samples`.
    pub fn from_samples(samples: &[f64], observed: f64) -> Self {
        let p_value = empirical_p_value(samples, observed);
        if p_value == 0.0 {
            let bound = 1.0 / samples.len() as f64;
            return Self {
                p_value,
                significance: significance_from_p_value(bound),
                lower_bound: true,
            };
        }
        Self { p_value, significance: significance_from_p_value(p_value), lower_bound: false }
    }
}

/// Which tail of the distribution is signal-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailConvention {
    /// Larger statistic is more signal-like.
    RightTail,
    /// Smaller statistic is more signal-like.
    LeftTail,
}

/// Toy generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyConfig {
    /// Toys under the null hypothesis
    pub n_toys_null: usize,
    /// Toys under the alternate hypothesis
    pub n_toys_alt: usize,
    /// Base seed
    pub seed: u64,
    /// Binned generation (the only supported mode)
    pub generate_binned: bool,
    /// Also draw global observables from their constraints
    pub randomize_global_observables: bool,
    /// Profile nuisance parameters on the observed data at each generation point
    pub profile_generation_point: bool,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            n_toys_null: 0,
            n_toys_alt: 0,
            seed: 0,
            generate_binned: true,
            randomize_global_observables: false,
            profile_generation_point: true,
        }
    }
}

/// Hypothesis a toy is generated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hypothesis {
    /// Background only
    Null,
    /// Signal plus background
    Alternate,
}

/// Observed result plus sampling distributions.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleResult {
    /// Result on the observed data
    pub observed: TestStatisticResult,
    /// Null toys, toy order
    pub null: Vec<TestStatisticResult>,
    /// Alternate toys, toy order
    pub alt: Vec<TestStatisticResult>,
    /// Tail convention
    pub tail: TailConvention,
    /// The null hypothesis is background only
    pub background_is_null: bool,
}

impl EnsembleResult {
    /// Null-toy statistics
    pub fn null_distribution(&self) -> Vec<f64> {
        self.null.iter().map(|r| r.ts).collect()
    }

    /// Alternate-toy statistics
    pub fn alt_distribution(&self) -> Vec<f64> {
        self.alt.iter().map(|r| r.ts).collect()
    }

    fn tail_fraction(&self, samples: &[f64], upper: bool) -> f64 {
        let obs = self.observed.ts;
        if samples.is_empty() {
            return f64::NAN;
        }
        let n = samples
            .iter()
            .filter(|&&t| if upper { t >= obs } else { t <= obs })
            .count();
        n as f64 / samples.len() as f64
    }

    /// Probability under the null of a statistic at least as signal-like as observed.
    pub fn null_p_value(&self) -> f64 {
        let upper = self.tail == TailConvention::RightTail;
        self.tail_fraction(&self.null_distribution(), upper)
    }

    /// Probability under the alternate of a statistic at most as signal-like as observed.
    pub fn alt_p_value(&self) -> f64 {
        let upper = self.tail == TailConvention::LeftTail;
        self.tail_fraction(&self.alt_distribution(), upper)
    }

    /// Significance of the null p-value.
    pub fn significance(&self) -> f64 {
        significance_from_p_value(self.null_p_value())
    }
}

/// Frequentist calculator driving toy generation and evaluation.
pub struct FrequentistCalculator {
    data: Dataset,
    alt: ModelConfig,
    null: ModelConfig,
    fitter: Arc<dyn FittingService>,
    test_stat: ProfileLikelihoodTestStat,
    config: ToyConfig,
}

impl std::fmt::Debug for FrequentistCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequentistCalculator")
            .field("data", &self.data.name)
            .field("alt", &self.alt.name())
            .field("null", &self.null.name())
            .field("test_stat", &self.test_stat)
            .field("config", &self.config)
            .finish()
    }
}

impl FrequentistCalculator {
    /// Calculator over observed `data` with the given hypotheses.
    pub fn new(
        data: Dataset,
        alt: ModelConfig,
        null: ModelConfig,
        fitter: Arc<dyn FittingService>,
        test_stat: ProfileLikelihoodTestStat,
    ) -> Self {
        Self { data, alt, null, fitter, test_stat, config: ToyConfig::default() }
    }

    /// Replace the toy settings.
    pub fn with_config(mut self, config: ToyConfig) -> Self {
        self.config = config;
        self
    }

    /// Toy settings
    pub fn config(&self) -> &ToyConfig {
        &self.config
    }

    /// Validate the setup and fix the generation points.
    pub fn test_stat_sampler(&self) -> Result<ToyMcSampler<'_>> {
        let poi = self.alt.poi()?;
        if self.null.poi()? != poi {
            return Err(Error::Config(format!(
                "null model POI '{}' differs from alternate POI '{poi}'",
                self.null.poi()?
            )));
        }
        let mu0 = null_poi_value(&self.null, poi)?;
        if !self.config.generate_binned {
            return Err(Error::Config("only binned toy generation is supported".to_string()));
        }
        let n_bins = self.alt.likelihood().n_bins();
        if self.null.likelihood().n_bins() != n_bins || self.data.n_bins() != n_bins {
            return Err(Error::Config(format!(
                "bin count mismatch: data {}, alternate {n_bins}, null {}",
                self.data.n_bins(),
                self.null.likelihood().n_bins()
            )));
        }

        let null_point = self.generation_point(&self.null, mu0)?;
        let alt_point = if self.config.n_toys_alt > 0 {
            let snapshot = self.alt.snapshot().ok_or_else(|| {
                Error::Config(format!("alternate model '{}' has no snapshot", self.alt.name()))
            })?;
            let mu1 = snapshot.get(poi).ok_or_else(|| {
                Error::Config(format!("snapshot '{}' does not fix POI '{poi}'", snapshot.name))
            })?;
            Some(self.generation_point(&self.alt, mu1)?)
        } else {
            None
        };

        Ok(ToyMcSampler { calc: self, null_point, alt_point })
    }

    fn generation_point(&self, model: &ModelConfig, mu: f64) -> Result<ParameterSet> {
        let poi = model.poi()?;
        let mut point = model.parameters().clone();
        point
            .get_mut(poi)
            .ok_or_else(|| Error::Config(format!("POI '{poi}' not found")))?
            .value = mu;
        if self.config.profile_generation_point {
            let fit = self.fitter.minimize(model.likelihood(), &self.data, &mut point, &[poi])?;
            log::info!(
                "{}: generation point at {poi}={mu} (status {}, minNLL {:.6})",
                model.name(),
                fit.status,
                fit.min_nll
            );
        }
        Ok(point)
    }

    /// Evaluate the observed data and both toy ensembles.
    pub fn run(&self) -> Result<EnsembleResult> {
        let sampler = self.test_stat_sampler()?;
        let observed = self.test_stat.evaluate(&self.alt, &self.null, &self.data)?;

        let null = sampler.sample(Hypothesis::Null, self.config.n_toys_null, self.config.seed)?;
        let alt = sampler.sample(
            Hypothesis::Alternate,
            self.config.n_toys_alt,
            self.config.seed.wrapping_add(ALT_SEED_OFFSET),
        )?;

        Ok(EnsembleResult {
            observed,
            null,
            alt,
            tail: TailConvention::RightTail,
            background_is_null: true,
        })
    }
}

/// Validated sampler with fixed generation points.
#[derive(Debug)]
pub struct ToyMcSampler<'a> {
    calc: &'a FrequentistCalculator,
    null_point: ParameterSet,
    alt_point: Option<ParameterSet>,
}

impl ToyMcSampler<'_> {
    /// Parameters toys of `hypothesis` are generated at.
    pub fn generation_point(&self, hypothesis: Hypothesis) -> Option<&ParameterSet> {
        match hypothesis {
            Hypothesis::Null => Some(&self.null_point),
            Hypothesis::Alternate => self.alt_point.as_ref(),
        }
    }

    /// Generate one toy.
    pub fn generate(&self, hypothesis: Hypothesis, seed: u64) -> Result<Dataset> {
        let calc = self.calc;
        let (model, point) = match hypothesis {
            Hypothesis::Null => (&calc.null, &self.null_point),
            Hypothesis::Alternate => {
                let point = self.alt_point.as_ref().ok_or_else(|| {
                    Error::Config("sampler was built without alternate toys".to_string())
                })?;
                (&calc.alt, point)
            }
        };
        let options = GenerateOptions {
            mode: GenerateMode::Binned,
            seed,
            randomize_global_observables: calc.config.randomize_global_observables,
        };
        calc.fitter.generate(model.likelihood(), point, options)
    }

    /// Generate and evaluate `n` toys; toy `i` uses `toy_seed(seed, i)`.
    pub fn sample(
        &self,
        hypothesis: Hypothesis,
        n: usize,
        seed: u64,
    ) -> Result<Vec<TestStatisticResult>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let calc = self.calc;
        let start = Instant::now();
        let results = (0..n)
            .into_par_iter()
            .with_min_len(4)
            .map(|i| {
                let toy = self.generate(hypothesis, toy_seed(seed, i as u64))?;
                calc.test_stat.evaluate(&calc.alt, &calc.null, &toy)
            })
            .collect::<Result<Vec<_>>>()?;
        let elapsed = start.elapsed().as_secs_f64();
        log::info!(
            "{hypothesis:?}: {n} toys in {elapsed:.2}s ({:.3}s/toy)",
            elapsed / n as f64
        );
        Ok(results)
    }
}
