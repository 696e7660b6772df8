//! Pseudo-dataset generation.
//!
//! Main bins are Poisson-fluctuated around the expectation at the generation
//! point. When requested, global observables are drawn from their constraint
//! terms: `Normal(theta, width)` for Gaussian constraints and
//! `Poisson(gamma * tau)` for Poisson constraints.

use ds_core::{
    Constraint, Dataset, Error, GenerateMode, GenerateOptions, Likelihood, ParamRole, ParameterSet,
    Result,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Poisson};
use std::collections::BTreeMap;

fn poisson_draw(lam: f64, rng: &mut StdRng) -> f64 {
    // Poisson(0) is deterministically 0; non-finite or negative rates are treated as 0.
    if !lam.is_finite() || lam <= 0.0 {
        return 0.0;
    }
    match Poisson::new(lam) {
        Ok(d) => d.sample(rng),
        Err(_) => 0.0,
    }
}

/// Draw every constrained global observable at the given parameter point.
pub fn sample_global_observables(
    likelihood: &dyn Likelihood,
    params: &ParameterSet,
    rng: &mut StdRng,
) -> Result<BTreeMap<String, f64>> {
    let mut out = BTreeMap::new();
    for p in params.iter().filter(|p| p.role != ParamRole::GlobalObservable) {
        let Some(constraint) = likelihood.constraint(&p.name) else { continue };
        let value = match &constraint {
            Constraint::Gaussian { width, .. } => Normal::new(p.value, *width)
                .map_err(|e| Error::Computation(format!("{}: {e}", p.name)))?
                .sample(rng),
            Constraint::Poisson { tau, .. } => poisson_draw(p.value * tau, rng),
        };
        out.insert(constraint.global_observable().to_string(), value);
    }
    Ok(out)
}

/// Generate one binned pseudo-dataset.
pub fn generate_binned(
    likelihood: &dyn Likelihood,
    params: &ParameterSet,
    options: GenerateOptions,
) -> Result<Dataset> {
    if options.mode != GenerateMode::Binned {
        return Err(Error::Validation("only binned generation is supported".to_string()));
    }
    let expected = likelihood.expected_main(&params.values())?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let counts: Vec<f64> = expected.iter().map(|&lam| poisson_draw(lam, &mut rng)).collect();
    let data = Dataset::new(format!("toy_{}", options.seed), counts);
    if options.randomize_global_observables {
        let globs = sample_global_observables(likelihood, params, &mut rng)?;
        Ok(data.with_global_observables(globs))
    } else {
        Ok(data)
    }
}
