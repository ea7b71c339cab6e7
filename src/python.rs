use crate::aggregate::aggregate;
use crate::config::ScorerKind;
use crate::gsva::{GsvaParams, GsvaScorer};
use crate::regression::{min_max_normalize, normalized_tmb, tigs};
use crate::simulation::{run_simulation, ExpressionMatrix, GenePanel, MeanScorer, Scorer, SimulationConfig};
use clap::ValueEnum;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::env;

/// Random gene panel simulation RUST
/// Arguments:
/// - gene_name: vector of gene_names
/// - gene_exp: gene_expression table. each row is gene, each column is sample
/// - sample_names: vector of sample names
/// - apm_genes, iis_genes: canonical panels
/// - repetitions
/// - sample_size: samples drawn per repetition
/// - randomizations: random panel pairs per repetition
/// - scorer: "gsva" or "mean"
/// - threads: number of threads
/// - seed: random seed
/// Returns a list of (normal, random_IIS, random_APS), one per repetition
#[pyfunction]
#[pyo3(signature = (gene_name, gene_exp, sample_names, apm_genes, iis_genes, repetitions = 100, sample_size = 500, randomizations = 10, scorer = "gsva", threads = 4, seed = 666))]
#[allow(clippy::too_many_arguments)]
fn simulate_rs(
    gene_name: Vec<String>,
    gene_exp: Vec<Vec<f64>>,
    sample_names: Vec<String>,
    apm_genes: Vec<String>,
    iis_genes: Vec<String>,
    repetitions: usize,
    sample_size: usize,
    randomizations: usize,
    scorer: &str,
    threads: usize,
    seed: u64,
) -> PyResult<Vec<(f64, f64, f64)>> {
    env::set_var("RAYON_NUM_THREADS", threads.to_string());
    let matrix = ExpressionMatrix::from_gene_rows(&gene_name, sample_names, &gene_exp)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let config = SimulationConfig {
        repetitions,
        sample_size,
        randomizations_per_repetition: randomizations,
    };
    let kind = ScorerKind::from_str(scorer, true)
        .map_err(|_| PyValueError::new_err(format!("unknown scorer '{scorer}'")))?;
    let scorer: Box<dyn Scorer> = match kind {
        ScorerKind::Gsva => Box::new(GsvaScorer::new(GsvaParams::default())),
        ScorerKind::Mean => Box::new(MeanScorer),
    };
    let mut rng = SmallRng::seed_from_u64(seed);
    let result = run_simulation(
        &matrix,
        &GenePanel::new("APM", &apm_genes),
        &GenePanel::new("IIS", &iis_genes),
        matrix.genes(),
        &config,
        scorer.as_ref(),
        &mut rng,
    )
    .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(aggregate(&result)
        .records
        .iter()
        .map(|r| (r.normal, r.random_IIS, r.random_APS))
        .collect())
}

/// TIGS RUST
/// Arguments:
/// - tmb_nonsyn: non-synonymous variant counts per patient
/// - apm: APM score per patient, min-max scaled over the given patients
#[pyfunction]
fn tigs_rs(tmb_nonsyn: Vec<f64>, apm: Vec<f64>) -> PyResult<Vec<f64>> {
    if tmb_nonsyn.len() != apm.len() {
        return Err(PyValueError::new_err("tmb_nonsyn and apm differ in length"));
    }
    let napm = min_max_normalize(&apm);
    Ok(tmb_nonsyn
        .iter()
        .zip(napm.iter())
        .map(|(&t, &a)| tigs(normalized_tmb(t), a))
        .collect())
}

/// Python module for the random gene panel simulation and TIGS
///
/// - `simulate_rs`: runs the simulation and the aggregation
/// - `tigs_rs`: per patient TIGS
#[pymodule]
#[pyo3(name = "tigs")]
fn tigs_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(simulate_rs, m)?)?;
    m.add_function(wrap_pyfunction!(tigs_rs, m)?)?;
    Ok(())
}
