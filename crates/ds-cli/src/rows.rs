//! Tabular result rows.

use anyhow::Result;
use ds_inference::TestStatisticResult;
use ds_inference::global::{TTBAR_NORM as TTBAR, ZHF_NORM as ZHF};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

fn secondary(map: &std::collections::BTreeMap<String, f64>, name: &str) -> f64 {
    map.get(name).copied().unwrap_or(f64::NAN)
}

/// One null toy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToyRow {
    pub q0: f64,
    pub muhat: f64,
    pub uncond_status: i32,
    #[serde(rename = "uncond_minNLL")]
    pub uncond_min_nll: f64,
    pub cond_status: i32,
    #[serde(rename = "cond_minNLL")]
    pub cond_min_nll: f64,
    pub seed: u64,
    pub index: usize,
    pub avg_time: f64,
    pub mu_range: f64,
    pub zhf_norm_cond: f64,
    pub zhf_norm_uncond: f64,
    pub ttbar_norm_cond: f64,
    pub ttbar_norm_uncond: f64,
    #[serde(rename = "uncond_covQual")]
    pub uncond_cov_qual: i32,
    #[serde(rename = "cond_covQual")]
    pub cond_cov_qual: i32,
    pub mass: f64,
}

impl ToyRow {
    pub fn new(
        seed: u64,
        index: usize,
        avg_time: f64,
        mu_range: f64,
        mass: f64,
        r: &TestStatisticResult,
    ) -> Self {
        Self {
            q0: r.ts,
            muhat: r.muhat,
            uncond_status: r.uncond_status,
            uncond_min_nll: r.uncond_min_nll,
            cond_status: r.cond_status,
            cond_min_nll: r.cond_min_nll,
            seed,
            index,
            avg_time,
            mu_range,
            zhf_norm_cond: secondary(&r.cond_secondary, ZHF),
            zhf_norm_uncond: secondary(&r.uncond_secondary, ZHF),
            ttbar_norm_cond: secondary(&r.cond_secondary, TTBAR),
            ttbar_norm_uncond: secondary(&r.uncond_secondary, TTBAR),
            uncond_cov_qual: r.uncond_cov_qual,
            cond_cov_qual: r.cond_cov_qual,
            mass,
        }
    }
}

/// Columns of a toy CSV needed for the significance.
#[derive(Debug, Clone, Deserialize)]
pub struct ToyRecord {
    pub q0: f64,
    pub muhat: f64,
    pub cond_status: i32,
    pub uncond_status: i32,
}

impl ToyRecord {
    /// Either fit reported a nonzero status.
    pub fn failed(&self) -> bool {
        self.cond_status != 0 || self.uncond_status != 0
    }

    /// `q0` with the one-sided transform applied.
    pub fn q0_one_sided(&self) -> f64 {
        if self.muhat <= 0.0 { 0.0 } else { self.q0 }
    }
}

/// Write rows as CSV with a header to `output`, or stdout.
pub fn write_csv<T: Serialize>(output: Option<&Path>, rows: &[T]) -> Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let mut wtr = csv::Writer::from_writer(sink);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `(index, mass)` pairs as headerless CSV to `output`, or stdout.
pub fn write_pairs(output: Option<&Path>, pairs: &[(usize, f64)]) -> Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
    for pair in pairs {
        wtr.serialize(pair)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read rows from every CSV file, in order.
pub fn read_csv<T: DeserializeOwned>(paths: &[impl AsRef<Path>]) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        for rec in rdr.deserialize::<T>() {
            out.push(rec.map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?);
        }
    }
    Ok(out)
}
