use crate::error::{IoError, ScoreError, SimulationError};
use crate::utils::{parse_f64, DynamicEnum, FileReader, Statistic};
use log::{debug, info, warn};
use rand::rngs::SmallRng; // use SmallRng intestad of StdRng to speedup sampling
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;

/// Sample-by-gene expression values of a whole cohort.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    samples: Vec<String>,
    genes: DynamicEnum<String>,
    values: Vec<Vec<f64>>, // [n_samples, n_genes]
}

impl ExpressionMatrix {
    /// values: [n_samples, n_genes]
    pub fn new(
        samples: Vec<String>,
        genes: &[String],
        values: Vec<Vec<f64>>,
    ) -> Result<Self, IoError> {
        let genes = DynamicEnum::from(genes);
        if values.len() != samples.len() {
            return Err(IoError::Format(format!(
                "{} sample names for {} rows",
                samples.len(),
                values.len()
            )));
        }
        if let Some(row) = values.iter().find(|r| r.len() != genes.size()) {
            return Err(IoError::Format(format!(
                "row of {} values for {} distinct genes",
                row.len(),
                genes.size()
            )));
        }
        Ok(ExpressionMatrix {
            samples,
            genes,
            values,
        })
    }

    /// gene_exp: [n_genes, n_samples], the usual layout of expression files
    pub fn from_gene_rows(
        genes: &[String],
        samples: Vec<String>,
        gene_exp: &[Vec<f64>],
    ) -> Result<Self, IoError> {
        if gene_exp.len() != genes.len() {
            return Err(IoError::Format(format!(
                "{} gene names for {} rows",
                genes.len(),
                gene_exp.len()
            )));
        }
        // transpose [m_gene, n_sample] --> [n_sample, m_gene]
        let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(genes.len()); samples.len()];
        for row in gene_exp {
            if row.len() != samples.len() {
                return Err(IoError::Format(format!(
                    "gene row of {} values for {} samples",
                    row.len(),
                    samples.len()
                )));
            }
            row.iter().enumerate().for_each(|(j, e)| values[j].push(*e));
        }
        // duplicated gene rows: keep the first one
        let mut index = DynamicEnum::new();
        let mut keep: Vec<usize> = Vec::with_capacity(genes.len());
        for (i, g) in genes.iter().enumerate() {
            if !index.contain_elt(g) {
                index.add_if_new(g.clone());
                keep.push(i);
            }
        }
        if keep.len() != genes.len() {
            warn!("{} duplicated gene rows dropped", genes.len() - keep.len());
            values = values
                .into_iter()
                .map(|r| keep.iter().map(|&i| r[i]).collect())
                .collect();
        }
        Self::new(samples, index.get_vec(), values)
    }

    /// Delimited file, first column gene id, header holds the sample names.
    pub fn read<P: AsRef<Path>>(file_path: P, delimiter: u8) -> Result<Self, IoError> {
        let mut gct = FileReader::new();
        gct.read_csv(file_path, delimiter, true, Some(b'#'))?;
        let samples: Vec<String> = gct.header.get_vec().iter().skip(1).cloned().collect();
        let mut genes: Vec<String> = Vec::with_capacity(gct.record.len());
        let mut gene_exp: Vec<Vec<f64>> = Vec::with_capacity(gct.record.len());
        for (i, r) in gct.record.iter().enumerate() {
            genes.push(r[0].to_string());
            let vv = r[1..]
                .iter()
                .map(|v| parse_f64(v, i + 2))
                .collect::<Result<Vec<f64>, IoError>>()?;
            gene_exp.push(vv);
        }
        info!("Loaded {} genes x {} samples", genes.len(), samples.len());
        Self::from_gene_rows(&genes, samples, &gene_exp)
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
    pub fn n_genes(&self) -> usize {
        self.genes.size()
    }
    pub fn samples(&self) -> &[String] {
        &self.samples
    }
    /// all assayable genes, the default universe for random panels
    pub fn genes(&self) -> &[String] {
        self.genes.get_vec()
    }

    /// rows: sample indices; genes absent from the cohort are dropped
    pub fn subset(&self, rows: &[usize], genes: &[String]) -> ExpressionSubset {
        let cols = self.genes.index_of_any(genes);
        let names: Vec<String> = cols
            .iter()
            .filter_map(|&c| self.genes.elt_of(c).cloned())
            .collect();
        ExpressionSubset {
            samples: rows.iter().map(|&r| self.samples[r].clone()).collect(),
            genes: DynamicEnum::from(&names),
            values: rows
                .iter()
                .map(|&r| cols.iter().map(|&c| self.values[r][c]).collect())
                .collect(),
        }
    }
}

/// A fixed draw of samples restricted to the genes of a panel pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionSubset {
    samples: Vec<String>,
    genes: DynamicEnum<String>,
    values: Vec<Vec<f64>>, // [n_samples, n_genes]
}

impl ExpressionSubset {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
    pub fn n_genes(&self) -> usize {
        self.genes.size()
    }
    pub fn samples(&self) -> &[String] {
        &self.samples
    }
    pub fn genes(&self) -> &DynamicEnum<String> {
        &self.genes
    }
    /// [n_samples, n_genes]
    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }
    /// column indices of the panel genes present in this subset
    pub fn panel_columns(&self, panel: &GenePanel) -> Vec<usize> {
        let mut cols = self.genes.index_of_any(&panel.genes);
        cols.sort_unstable();
        cols.dedup();
        cols
    }
    /// transpose to [n_genes, n_samples]
    pub fn gene_rows(&self) -> Vec<Vec<f64>> {
        (0..self.n_genes())
            .map(|c| self.values.iter().map(|row| row[c]).collect())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenePanel {
    pub name: String,
    pub genes: Vec<String>,
}

impl GenePanel {
    pub fn new(name: &str, genes: &[String]) -> Self {
        GenePanel {
            name: name.to_string(),
            genes: genes.to_vec(),
        }
    }
    pub fn len(&self) -> usize {
        self.genes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
    /// uniform draw without replacement, canonical genes are not excluded
    pub fn draw<R>(name: &str, universe: &[String], size: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        GenePanel {
            name: name.to_string(),
            genes: universe.choose_multiple(rng, size).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPair {
    pub apm: GenePanel,
    pub iis: GenePanel,
}

impl PanelPair {
    /// one random panel per role, drawn independently with the canonical cardinalities
    pub fn random<R>(universe: &[String], apm_size: usize, iis_size: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        PanelPair {
            apm: GenePanel::draw("random_APM", universe, apm_size, rng),
            iis: GenePanel::draw("random_IIS", universe, iis_size, rng),
        }
    }
    /// genes of both panels, first occurrence order
    pub fn union(&self) -> Vec<String> {
        let mut all = DynamicEnum::new();
        self.apm
            .genes
            .iter()
            .chain(self.iis.genes.iter())
            .for_each(|g| {
                all.add_if_new(g.clone());
            });
        all.get_vec().to_vec()
    }
}

/// Per-sample (APM, IIS) scores in the sample order of the subset.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub apm: Vec<f64>,
    pub iis: Vec<f64>,
}

impl ScoreTable {
    pub fn len(&self) -> usize {
        self.apm.len()
    }
    pub fn is_empty(&self) -> bool {
        self.apm.is_empty()
    }
}

/// Gene-set scoring function, a black box that may fail per call.
pub trait Scorer: Sync {
    fn score(&self, subset: &ExpressionSubset, panels: &PanelPair) -> Result<ScoreTable, ScoreError>;
}

impl<F> Scorer for F
where
    F: Fn(&ExpressionSubset, &PanelPair) -> Result<ScoreTable, ScoreError> + Sync,
{
    fn score(&self, subset: &ExpressionSubset, panels: &PanelPair) -> Result<ScoreTable, ScoreError> {
        self(subset, panels)
    }
}

/// Per sample mean of the panel genes, for each role.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanScorer;

impl MeanScorer {
    fn role_mean(subset: &ExpressionSubset, panel: &GenePanel) -> Result<Vec<f64>, ScoreError> {
        let cols = subset.panel_columns(panel);
        if cols.is_empty() {
            return Err(ScoreError::EmptyPanel(panel.name.clone()));
        }
        let scores: Vec<f64> = subset
            .values()
            .iter()
            .map(|row| {
                let v: Vec<f64> = cols.iter().map(|&c| row[c]).collect();
                v.as_slice().mean()
            })
            .collect();
        if scores.iter().any(|v| !v.is_finite()) {
            return Err(ScoreError::NonFinite(panel.name.clone()));
        }
        Ok(scores)
    }
}

impl Scorer for MeanScorer {
    fn score(&self, subset: &ExpressionSubset, panels: &PanelPair) -> Result<ScoreTable, ScoreError> {
        if subset.n_samples() == 0 {
            return Err(ScoreError::NoSamples);
        }
        Ok(ScoreTable {
            apm: Self::role_mean(subset, &panels.apm)?,
            iis: Self::role_mean(subset, &panels.iis)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationConfig {
    pub repetitions: usize,
    pub sample_size: usize,
    pub randomizations_per_repetition: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            repetitions: 100,
            sample_size: 500,
            randomizations_per_repetition: 10,
        }
    }
}

/// One randomized panel pair and its scoring outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub panels: PanelPair,
    pub scores: Result<ScoreTable, ScoreError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repetition {
    /// 1-based repetition number
    pub index: usize,
    /// cohort row indices of the drawn samples
    pub samples: Vec<usize>,
    pub normal: Result<ScoreTable, ScoreError>,
    pub random: Vec<Trial>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub config: SimulationConfig,
    pub repetitions: Vec<Repetition>,
}

impl SimulationResult {
    /// number of randomized trials whose scoring failed
    pub fn failed_trials(&self) -> usize {
        self.repetitions
            .iter()
            .map(|r| r.random.iter().filter(|t| t.scores.is_err()).count())
            .sum()
    }
}

fn validate(
    matrix: &ExpressionMatrix,
    apm: &GenePanel,
    iis: &GenePanel,
    universe_size: usize,
    config: &SimulationConfig,
) -> Result<(), SimulationError> {
    if config.repetitions == 0 {
        return Err(SimulationError::ZeroCount("repetitions"));
    }
    if config.randomizations_per_repetition == 0 {
        return Err(SimulationError::ZeroCount("randomizations_per_repetition"));
    }
    if config.sample_size == 0 {
        return Err(SimulationError::ZeroCount("sample_size"));
    }
    if config.sample_size > matrix.n_samples() {
        return Err(SimulationError::SampleSizeTooLarge {
            requested: config.sample_size,
            available: matrix.n_samples(),
        });
    }
    for panel in [apm, iis] {
        if panel.is_empty() {
            return Err(SimulationError::EmptyCanonicalPanel(panel.name.clone()));
        }
        if panel.len() > universe_size {
            return Err(SimulationError::PanelTooLarge {
                requested: panel.len(),
                available: universe_size,
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_repetition<S>(
    index: usize,
    seed: u64,
    matrix: &ExpressionMatrix,
    normal_panels: &PanelPair,
    universe: &[String],
    config: &SimulationConfig,
    scorer: &S,
) -> Repetition
where
    S: Scorer + ?Sized,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    let samples =
        rand::seq::index::sample(&mut rng, matrix.n_samples(), config.sample_size).into_vec();

    let normal = scorer.score(&matrix.subset(&samples, &normal_panels.union()), normal_panels);
    if let Err(e) = &normal {
        warn!("repetition {index}: normal panels failed to score: {e}");
    }

    let random: Vec<Trial> = (1..=config.randomizations_per_repetition)
        .map(|j| {
            let panels = PanelPair::random(
                universe,
                normal_panels.apm.len(),
                normal_panels.iis.len(),
                &mut rng,
            );
            let scores = scorer.score(&matrix.subset(&samples, &panels.union()), &panels);
            if let Err(e) = &scores {
                warn!("repetition {index}, trial {j} skipped: {e}");
            }
            Trial { panels, scores }
        })
        .collect();
    debug!(
        "repetition {index}: {} of {} random trials scored",
        random.iter().filter(|t| t.scores.is_ok()).count(),
        random.len()
    );
    Repetition {
        index,
        samples,
        normal,
        random,
    }
}

/// Repeated sample draws scored with the canonical panels and with random panels.
///
/// One seed per repetition is taken from `rng` up front, so the result only
/// depends on the state of `rng` and not on the number of rayon threads.
/// Scoring failures are kept in the result as skipped trials.
pub fn run_simulation<S, R>(
    matrix: &ExpressionMatrix,
    apm: &GenePanel,
    iis: &GenePanel,
    gene_universe: &[String],
    config: &SimulationConfig,
    scorer: &S,
    rng: &mut R,
) -> Result<SimulationResult, SimulationError>
where
    S: Scorer + ?Sized,
    R: Rng + ?Sized,
{
    let universe = DynamicEnum::from(gene_universe);
    validate(matrix, apm, iis, universe.size(), config)?;
    info!(
        "Simulating {} repetitions of {} samples, {} random panel pairs each",
        config.repetitions, config.sample_size, config.randomizations_per_repetition
    );
    let start = Instant::now();
    let normal_panels = PanelPair {
        apm: apm.clone(),
        iis: iis.clone(),
    };
    let seeds: Vec<u64> = (0..config.repetitions).map(|_| rng.gen()).collect();
    let repetitions: Vec<Repetition> = seeds
        .into_par_iter()
        .enumerate()
        .map(|(i, seed)| {
            run_repetition(
                i + 1,
                seed,
                matrix,
                &normal_panels,
                universe.get_vec(),
                config,
                scorer,
            )
        })
        .collect();
    let result = SimulationResult {
        config: *config,
        repetitions,
    };
    info!(
        "Simulation done in {:.2?}, {} trials skipped",
        start.elapsed(),
        result.failed_trials()
    );
    Ok(result)
}
