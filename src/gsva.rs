use crate::error::ScoreError;
use crate::simulation::{ExpressionSubset, GenePanel, PanelPair, ScoreTable, Scorer};
use crate::utils::Statistic;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, DiscreteCDF, Normal, Poisson};

/// GSVA parameters, see https://github.com/rcastelo/GSVA/blob/devel/R/gsva.R
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GsvaParams {
    /// kernel estimation of the gene CDF, ECDF otherwise
    pub kcdf: bool,
    /// Poisson kernel for integer counts, Gaussian otherwise
    pub rnaseq: bool,
    pub tau: f64,
    pub mx_diff: bool,
    pub abs_rnk: bool,
}

impl Default for GsvaParams {
    fn default() -> Self {
        GsvaParams {
            kcdf: true,
            rnaseq: false,
            tau: 1.0,
            mx_diff: true,
            abs_rnk: false,
        }
    }
}

/// Scores each panel of a pair on the genes of the subset.
#[derive(Debug, Clone)]
pub struct GsvaScorer {
    params: GsvaParams,
    pre_res: usize,
    max_pre: usize,
    sigma: f64,
    pre_cdf: Vec<f64>,
}

impl Default for GsvaScorer {
    fn default() -> Self {
        Self::new(GsvaParams::default())
    }
}

impl GsvaScorer {
    /// default: precomputed_resolution 10000, max_precompute: 10
    pub fn new(params: GsvaParams) -> Self {
        let pre_res = 10000;
        let max_pre = 10;
        GsvaScorer {
            params,
            pre_res,
            max_pre,
            sigma: 4.0,
            pre_cdf: Self::init_cdfs(pre_res, max_pre),
        }
    }

    /// https://github.com/rcastelo/GSVA/blob/devel/src/kernel_estimation.c, line 123
    fn init_cdfs(pre_res: usize, max_pre: usize) -> Vec<f64> {
        let divisor: f64 = pre_res as f64;
        match Normal::new(0.0, 1.0) {
            Ok(norm) => (0..=pre_res)
                .map(|i| norm.cdf(((i * max_pre) as f64) / divisor))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// sigma factor: 4.0
    fn precomputed_cdfs(&self, x: f64, sigma: f64) -> f64 {
        let v = x / sigma;
        let max_precompute = self.max_pre as f64;
        let precompute_resolution = self.pre_res as f64;
        if v < -max_precompute {
            0.0
        } else if v > max_precompute {
            1.0
        } else {
            let idx = ((v.abs() / max_precompute * precompute_resolution) as usize)
                .min(self.pre_cdf.len().saturating_sub(1));
            let cdf = self.pre_cdf.get(idx).copied().unwrap_or(0.5);
            if v < 0.0 {
                1.0 - cdf
            } else {
                cdf
            }
        }
    }

    /// row: gene values of all samples, log-odds of the empirical CDF
    fn apply_ecdf(&self, row: &[f64]) -> Vec<f64> {
        let mut x0 = row.to_vec();
        let n = row.len() as f64;
        // sort then binary search, partition_point gives "number of samples <= v"
        x0.sort_unstable_by(|a, b| a.total_cmp(b));
        row.iter()
            .map(|v| ((x0.partition_point(|x| x <= v)) as f64) / n)
            .map(|v| (v / (1.0 - v)).ln())
            .collect()
    }

    fn row_d(&self, x: &[f64]) -> Vec<f64> {
        let size = x.len();
        let bw = if self.params.rnaseq {
            0.5
        } else {
            x.stat(1).1 / self.sigma
        };
        x.iter()
            .map(|&y| {
                let left_tail = x
                    .iter()
                    .map(|&xi| {
                        if self.params.rnaseq {
                            // ppois(y, x + bw), counts are expected
                            Poisson::new(xi + bw)
                                .map(|pois| pois.cdf(y as u64))
                                .unwrap_or(f64::NAN)
                        } else {
                            self.precomputed_cdfs(y - xi, bw)
                        }
                    })
                    .sum::<f64>()
                    / (size as f64);
                -((1.0 - left_tail) / left_tail).ln()
            })
            .collect()
    }

    /// mat: [n_genes, n_samples]
    /// return gene_density matrix [n_genes, n_samples]
    pub fn compute_density(&self, mat: &[Vec<f64>]) -> Vec<Vec<f64>> {
        if self.params.kcdf {
            mat.par_iter().map(|row| self.row_d(row)).collect()
        } else {
            mat.iter().map(|row| self.apply_ecdf(row)).collect()
        }
    }

    /// density: [n_genes, n_samples]
    /// return per sample (rank scores in gene order, gene indices sorted by decreasing density)
    fn compute_rank_score(&self, density: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<Vec<usize>>) {
        let n_genes = density.len();
        let n_samples = density.first().map_or(0, |r| r.len());
        // R code: tmp[sort_idx_vec] <- abs(seq(from=num_genes,to=1) - num_genes/2)
        let rev_idx: Vec<f64> = (1..=n_genes)
            .rev()
            .map(|v| ((v as f64) - (n_genes as f64) / 2.0).abs())
            .collect();
        (0..n_samples)
            .map(|sample_idx| {
                let sample: Vec<f64> = density.iter().map(|gene| gene[sample_idx]).collect();
                let (sorted_idx, _) = sample.as_slice().argsort(false);
                let mut tmp = vec![0.0; n_genes];
                sorted_idx.iter().enumerate().for_each(|(i, &j)| {
                    tmp[j] = rev_idx[i];
                });
                (tmp, sorted_idx)
            })
            .unzip()
    }

    fn ks_sample(&self, rank_score: &[f64], sidx: &[usize], geneset_mask: &[bool], fset: &[usize]) -> f64 {
        let tau = self.params.tau;
        let n_genes = rank_score.len();
        let dec = 1.0 / ((n_genes - fset.len()) as f64);
        let sum_gset: f64 = fset.iter().map(|&i| rank_score[i].powf(tau)).sum();

        let mut cum_sum = 0.0;
        let mut mx_pos = 0.0;
        let mut mx_neg = 0.0;
        for &idx in sidx {
            if geneset_mask[idx] {
                cum_sum += rank_score[idx].powf(tau) / sum_gset;
            } else {
                cum_sum -= dec;
            }
            if cum_sum > mx_pos {
                mx_pos = cum_sum;
            }
            if cum_sum < mx_neg {
                mx_neg = cum_sum;
            }
        }
        if self.params.mx_diff {
            if self.params.abs_rnk {
                mx_pos - mx_neg
            } else {
                mx_pos + mx_neg
            }
        } else if mx_pos > f64::abs(mx_neg) {
            mx_pos
        } else {
            mx_neg
        }
    }

    fn panel_scores(
        &self,
        subset: &ExpressionSubset,
        panel: &GenePanel,
        rank_scores: &[Vec<f64>],
        sort_idxs: &[Vec<usize>],
    ) -> Result<Vec<f64>, ScoreError> {
        let fset = subset.panel_columns(panel);
        let n_genes = subset.n_genes();
        if fset.is_empty() {
            return Err(ScoreError::EmptyPanel(panel.name.clone()));
        }
        if fset.len() == n_genes {
            return Err(ScoreError::FullPanel {
                panel: panel.name.clone(),
                n_genes,
            });
        }
        let mut geneset_mask = vec![false; n_genes];
        fset.iter().for_each(|&i| geneset_mask[i] = true);
        let scores: Vec<f64> = rank_scores
            .iter()
            .zip(sort_idxs.iter())
            .map(|(rs, idx)| self.ks_sample(rs, idx, &geneset_mask, &fset))
            .collect();
        if scores.iter().any(|v| !v.is_finite()) {
            return Err(ScoreError::NonFinite(panel.name.clone()));
        }
        Ok(scores)
    }
}

impl Scorer for GsvaScorer {
    fn score(&self, subset: &ExpressionSubset, panels: &PanelPair) -> Result<ScoreTable, ScoreError> {
        if subset.n_samples() == 0 {
            return Err(ScoreError::NoSamples);
        }
        let density = self.compute_density(&subset.gene_rows());
        let (rank_scores, sort_idxs) = self.compute_rank_score(&density);
        Ok(ScoreTable {
            apm: self.panel_scores(subset, &panels.apm, &rank_scores, &sort_idxs)?,
            iis: self.panel_scores(subset, &panels.iis, &rank_scores, &sort_idxs)?,
        })
    }
}
