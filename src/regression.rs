use crate::error::{IoError, RegressionError};
use crate::utils::Statistic;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;
use std::path::Path;

/// Megabases of exome assumed when normalizing mutation counts.
pub const EXOME_SIZE_MB: f64 = 38.0;

/// nTMB = non-synonymous variants / 38
pub fn normalized_tmb(nonsyn: f64) -> f64 {
    nonsyn / EXOME_SIZE_MB
}

/// Min-max scaling to [0, 1] over the finite values; NaN stays NaN.
/// A cohort without spread has no defined scale and maps to NaN.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    values
        .iter()
        .map(|&v| {
            if v.is_finite() && range > 0.0 {
                (v - lo) / range
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// TIGS = log(nTMB + 1) * nAPM
pub fn tigs(ntmb: f64, napm: f64) -> f64 {
    (ntmb + 1.0).ln() * napm
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatientRecord {
    pub patient: String,
    pub tumor_type: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub tmb_nonsyn: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub apm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientScore {
    pub patient: String,
    pub tumor_type: String,
    pub apm: f64,
    pub ntmb: f64,
    pub napm: f64,
    pub tigs: f64,
}

/// nAPM is scaled over all given patients.
pub fn score_patients(patients: &[PatientRecord]) -> Vec<PatientScore> {
    let apm: Vec<f64> = patients
        .iter()
        .map(|p| p.apm.unwrap_or(f64::NAN))
        .collect();
    let napm = min_max_normalize(&apm);
    patients
        .iter()
        .zip(apm.iter().zip(napm.iter()))
        .map(|(p, (&a, &n))| {
            let ntmb = p.tmb_nonsyn.map_or(f64::NAN, normalized_tmb);
            PatientScore {
                patient: p.patient.clone(),
                tumor_type: p.tumor_type.clone(),
                apm: a,
                ntmb,
                napm: n,
                tigs: tigs(ntmb, n),
            }
        })
        .collect()
}

/// Per tumor type medians, the regression input table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TumorTypeSummary {
    pub tumor_type: String,
    #[serde(rename = "Patients_TIGS")]
    pub patients_tigs: usize,
    #[serde(rename = "TIGS")]
    pub tigs: f64,
    #[serde(rename = "Patients_APS")]
    pub patients_aps: usize,
    #[serde(rename = "APS")]
    pub aps: f64,
    #[serde(rename = "Patients_TMB")]
    pub patients_tmb: usize,
    #[serde(rename = "TMB")]
    pub tmb: f64,
    #[serde(rename = "ORR")]
    pub orr: f64,
    #[serde(rename = "Patients_ORR")]
    pub patients_orr: usize,
}

impl TumorTypeSummary {
    fn empty(tumor_type: &str) -> Self {
        TumorTypeSummary {
            tumor_type: tumor_type.to_string(),
            patients_tigs: 0,
            tigs: f64::NAN,
            patients_aps: 0,
            aps: f64::NAN,
            patients_tmb: 0,
            tmb: f64::NAN,
            orr: f64::NAN,
            patients_orr: 0,
        }
    }
}

fn count_and_median(values: &[f64]) -> (usize, f64) {
    (values.iter().filter(|v| v.is_finite()).count(), values.median())
}

/// Sorted by tumor type.
pub fn summarize_by_tumor_type(scores: &[PatientScore]) -> Vec<TumorTypeSummary> {
    let mut groups: BTreeMap<&str, Vec<&PatientScore>> = BTreeMap::new();
    for s in scores {
        groups.entry(s.tumor_type.as_str()).or_default().push(s);
    }
    groups
        .into_iter()
        .map(|(tumor_type, members)| {
            let col = |f: fn(&PatientScore) -> f64| -> Vec<f64> {
                members.iter().map(|&p| f(p)).collect()
            };
            let (patients_tigs, tigs) = count_and_median(&col(|p| p.tigs));
            let (patients_aps, aps) = count_and_median(&col(|p| p.apm));
            let (patients_tmb, tmb) = count_and_median(&col(|p| p.ntmb));
            TumorTypeSummary {
                patients_tigs,
                tigs,
                patients_aps,
                aps,
                patients_tmb,
                tmb,
                ..TumorTypeSummary::empty(tumor_type)
            }
        })
        .collect()
}

/// Curated response rate of one tumor type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrrRecord {
    pub tumor_type: String,
    #[serde(rename = "ORR", deserialize_with = "csv::invalid_option")]
    pub orr: Option<f64>,
    #[serde(rename = "Patients_ORR", deserialize_with = "csv::invalid_option")]
    pub patients_orr: Option<usize>,
}

/// Full outer join on tumor type; the side that is missing stays NaN.
pub fn merge_orr(summaries: &[TumorTypeSummary], orr: &[OrrRecord]) -> Vec<TumorTypeSummary> {
    let mut merged: BTreeMap<String, TumorTypeSummary> = summaries
        .iter()
        .map(|s| (s.tumor_type.clone(), s.clone()))
        .collect();
    for o in orr {
        let entry = merged.entry(o.tumor_type.clone()).or_insert_with(|| {
            warn!("tumor type '{}' has ORR but no patient scores", o.tumor_type);
            TumorTypeSummary::empty(&o.tumor_type)
        });
        entry.orr = o.orr.unwrap_or(f64::NAN);
        entry.patients_orr = o.patients_orr.unwrap_or(0);
    }
    let merged: Vec<TumorTypeSummary> = merged.into_values().collect();
    merged
        .iter()
        .filter(|s| s.orr.is_nan())
        .for_each(|s| warn!("tumor type '{}' has no ORR", s.tumor_type));
    merged
}

/// Ordinary least squares of y on a single predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson r
    pub r: f64,
    pub r_squared: f64,
    /// complete rows used
    pub n: usize,
    pub df: usize,
    pub residual_se: f64,
    pub slope_p_value: f64,
    x_mean: f64,
    sxx: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub x: f64,
    pub fit: f64,
    pub lower: f64,
    pub upper: f64,
}

fn students_t(df: usize) -> Result<StudentsT, RegressionError> {
    StudentsT::new(0.0, 1.0, df as f64).map_err(|_| RegressionError::InsufficientData(df + 2))
}

/// Rows with a NaN on either side are dropped before fitting.
pub fn fit_ols(x: &[f64], y: &[f64]) -> Result<LinearFit, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::LengthMismatch(x.len(), y.len()));
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();
    let n = xs.len();
    if n < 3 {
        return Err(RegressionError::InsufficientData(n));
    }
    let mx = xs.as_slice().mean();
    let my = ys.as_slice().mean();
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in xs.iter().zip(ys.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    if sxx <= 0.0 {
        return Err(RegressionError::ConstantPredictor);
    }
    if syy <= 0.0 {
        return Err(RegressionError::ConstantResponse);
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let sse: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(&a, &b)| {
            let e = b - (intercept + slope * a);
            e * e
        })
        .sum();
    let df = n - 2;
    let residual_se = (sse / df as f64).sqrt();
    let t = slope / (residual_se / sxx.sqrt());
    // perfect fit: t is infinite
    let slope_p_value = if t.is_infinite() {
        0.0
    } else {
        2.0 * (1.0 - students_t(df)?.cdf(t.abs()))
    };
    let r = sxy / (sxx * syy).sqrt();
    Ok(LinearFit {
        slope,
        intercept,
        r,
        r_squared: r * r,
        n,
        df,
        residual_se,
        slope_p_value,
        x_mean: mx,
        sxx,
    })
}

impl LinearFit {
    /// Point prediction with the confidence interval of the mean response.
    pub fn predict(&self, x0: f64, level: f64) -> Result<Prediction, RegressionError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(RegressionError::InvalidLevel(level));
        }
        let q = students_t(self.df)?.inverse_cdf(1.0 - (1.0 - level) / 2.0);
        let se_fit = self.residual_se
            * (1.0 / self.n as f64 + (x0 - self.x_mean).powi(2) / self.sxx).sqrt();
        let fit = self.intercept + self.slope * x0;
        Ok(Prediction {
            x: x0,
            fit,
            lower: fit - q * se_fit,
            upper: fit + q * se_fit,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    Tigs,
    Aps,
    Tmb,
}

impl Predictor {
    pub const ALL: [Predictor; 3] = [Predictor::Tigs, Predictor::Aps, Predictor::Tmb];

    pub fn name(&self) -> &'static str {
        match self {
            Predictor::Tigs => "TIGS",
            Predictor::Aps => "APS",
            Predictor::Tmb => "TMB",
        }
    }

    pub fn value(&self, s: &TumorTypeSummary) -> f64 {
        match self {
            Predictor::Tigs => s.tigs,
            Predictor::Aps => s.aps,
            Predictor::Tmb => s.tmb,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictorFit {
    pub predictor: Predictor,
    pub fit: Result<LinearFit, RegressionError>,
    /// tumor types dropped for a missing predictor or ORR
    pub excluded: usize,
}

/// ORR ~ predictor, one model per predictor.
pub fn fit_orr_models(table: &[TumorTypeSummary]) -> Vec<PredictorFit> {
    let y: Vec<f64> = table.iter().map(|s| s.orr).collect();
    Predictor::ALL
        .iter()
        .map(|&predictor| {
            let x: Vec<f64> = table.iter().map(|s| predictor.value(s)).collect();
            let fit = fit_ols(&x, &y);
            let used = fit.as_ref().map_or_else(
                |_| {
                    x.iter()
                        .zip(y.iter())
                        .filter(|(a, b)| a.is_finite() && b.is_finite())
                        .count()
                },
                |f| f.n,
            );
            match &fit {
                Ok(f) => info!(
                    "ORR ~ {}: slope {:.4}, intercept {:.4}, r {:.3}, R2 {:.3}, n {}",
                    predictor.name(),
                    f.slope,
                    f.intercept,
                    f.r,
                    f.r_squared,
                    f.n
                ),
                Err(e) => warn!("ORR ~ {} not fitted: {e}", predictor.name()),
            }
            PredictorFit {
                predictor,
                fit,
                excluded: table.len() - used,
            }
        })
        .collect()
}

pub fn read_patients<P: AsRef<Path>>(file_path: P) -> Result<Vec<PatientRecord>, IoError> {
    let mut rdr = csv::ReaderBuilder::new().from_path(file_path)?;
    let mut out = Vec::new();
    for rec in rdr.deserialize() {
        out.push(rec?);
    }
    Ok(out)
}

pub fn read_orr<P: AsRef<Path>>(file_path: P) -> Result<Vec<OrrRecord>, IoError> {
    let mut rdr = csv::ReaderBuilder::new().from_path(file_path)?;
    let mut out = Vec::new();
    for rec in rdr.deserialize() {
        out.push(rec?);
    }
    Ok(out)
}

pub fn write_summaries<P: AsRef<Path>>(
    table: &[TumorTypeSummary],
    file_path: P,
) -> Result<(), IoError> {
    let mut wtr = csv::WriterBuilder::new().from_path(file_path)?;
    for s in table {
        wtr.serialize(s)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tumor_type: &str, tigs: f64, orr: f64) -> TumorTypeSummary {
        TumorTypeSummary {
            patients_tigs: 10,
            tigs,
            orr,
            patients_orr: 20,
            ..TumorTypeSummary::empty(tumor_type)
        }
    }

    #[test]
    fn test_tigs_definition() {
        let ntmb = normalized_tmb(76.0);
        assert_eq!(ntmb, 2.0);
        let napm = min_max_normalize(&[0.0, 10.0, 5.0]);
        assert_eq!(napm[2], 0.5);
        let t = tigs(ntmb, napm[2]);
        assert!((t - 0.5493).abs() < 5e-5);
        assert!((t - 3f64.ln() * 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_min_max_edge_cases() {
        let v = min_max_normalize(&[2.0, f64::NAN, 4.0]);
        assert_eq!(v[0], 0.0);
        assert!(v[1].is_nan());
        assert_eq!(v[2], 1.0);
        assert!(min_max_normalize(&[3.0, 3.0]).iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_summarize_and_merge() {
        let patients = vec![
            PatientRecord {
                patient: "p1".into(),
                tumor_type: "SKCM".into(),
                tmb_nonsyn: Some(380.0),
                apm: Some(10.0),
            },
            PatientRecord {
                patient: "p2".into(),
                tumor_type: "SKCM".into(),
                tmb_nonsyn: Some(38.0),
                apm: Some(6.0),
            },
            PatientRecord {
                patient: "p3".into(),
                tumor_type: "LUAD".into(),
                tmb_nonsyn: None,
                apm: Some(0.0),
            },
        ];
        let scores = score_patients(&patients);
        assert_eq!(scores[0].napm, 1.0);
        assert_eq!(scores[0].ntmb, 10.0);
        assert!(scores[2].tigs.is_nan());
        let summary = summarize_by_tumor_type(&scores);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].tumor_type, "LUAD");
        assert_eq!(summary[0].patients_tigs, 0);
        assert_eq!(summary[0].patients_aps, 1);
        assert_eq!(summary[1].patients_tmb, 2);
        assert!((summary[1].tmb - 5.5).abs() < 1e-12);
        assert!((summary[1].aps - 8.0).abs() < 1e-12);

        let orr = vec![
            OrrRecord {
                tumor_type: "SKCM".into(),
                orr: Some(0.35),
                patients_orr: Some(400),
            },
            OrrRecord {
                tumor_type: "KIRC".into(),
                orr: Some(0.25),
                patients_orr: Some(150),
            },
        ];
        let merged = merge_orr(&summary, &orr);
        assert_eq!(merged.len(), 3);
        let kirc = merged.iter().find(|s| s.tumor_type == "KIRC").unwrap();
        assert!(kirc.tigs.is_nan());
        assert_eq!(kirc.patients_orr, 150);
        let luad = merged.iter().find(|s| s.tumor_type == "LUAD").unwrap();
        assert!(luad.orr.is_nan());
        let skcm = merged.iter().find(|s| s.tumor_type == "SKCM").unwrap();
        assert_eq!(skcm.orr, 0.35);
    }

    #[test]
    fn test_ols_and_confidence_interval() {
        let fit = fit_ols(&[1.0, 2.0, 3.0, 4.0], &[1.0, 3.0, 2.0, 4.0]).unwrap();
        assert!((fit.slope - 0.8).abs() < 1e-12);
        assert!((fit.intercept - 0.5).abs() < 1e-12);
        assert!((fit.r - 0.8).abs() < 1e-12);
        assert!((fit.r_squared - 0.64).abs() < 1e-12);
        assert_eq!((fit.n, fit.df), (4, 2));
        assert!((fit.residual_se - 0.9f64.sqrt()).abs() < 1e-12);
        assert!((fit.slope_p_value - 0.2).abs() < 1e-6);

        let p = fit.predict(2.5, 0.95).unwrap();
        assert!((p.fit - 2.5).abs() < 1e-12);
        assert!((p.lower - 0.459083).abs() < 1e-4);
        assert!((p.upper - 4.540917).abs() < 1e-4);
        // wider away from the predictor mean
        let q = fit.predict(6.0, 0.95).unwrap();
        assert!(q.upper - q.lower > p.upper - p.lower);
        assert_eq!(fit.predict(2.5, 1.5), Err(RegressionError::InvalidLevel(1.5)));
    }

    #[test]
    fn test_ols_errors() {
        assert_eq!(
            fit_ols(&[1.0, 2.0], &[1.0, 2.0]),
            Err(RegressionError::InsufficientData(2))
        );
        assert_eq!(
            fit_ols(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(RegressionError::ConstantPredictor)
        );
        assert_eq!(
            fit_ols(&[1.0], &[1.0, 2.0]),
            Err(RegressionError::LengthMismatch(1, 2))
        );
    }

    #[test]
    fn test_ols_constant_response() {
        assert_eq!(
            fit_ols(&[1.0, 2.0, 3.0, 4.0], &[0.3; 4]),
            Err(RegressionError::ConstantResponse)
        );
        // an exact line still reports a defined fit
        let fit = fit_ols(&[1.0, 2.0, 3.0, 4.0], &[3.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.r - 1.0).abs() < 1e-12);
        assert!(fit.slope_p_value < 1e-12);
    }

    #[test]
    fn test_missing_orr_rows_are_excluded() {
        let table = vec![
            row("A", 1.0, 0.10),
            row("B", 2.0, f64::NAN),
            row("C", 3.0, 0.31),
            row("D", 4.0, 0.38),
            row("E", 5.0, f64::NAN),
            row("F", 6.0, 0.62),
        ];
        let fits = fit_orr_models(&table);
        let tigs = fits.iter().find(|f| f.predictor == Predictor::Tigs).unwrap();
        let fit = tigs.fit.as_ref().unwrap();
        assert_eq!(fit.n, 4);
        assert_eq!(tigs.excluded, 2);
        let complete = fit_ols(&[1.0, 3.0, 4.0, 6.0], &[0.10, 0.31, 0.38, 0.62]).unwrap();
        assert!((fit.slope - complete.slope).abs() < 1e-12);
        // APS and TMB are all missing in this table
        let aps = fits.iter().find(|f| f.predictor == Predictor::Aps).unwrap();
        assert_eq!(aps.fit, Err(RegressionError::InsufficientData(0)));
        assert_eq!(aps.excluded, 6);
    }

    #[test]
    fn test_read_tables() {
        let dir = tempfile::tempdir().unwrap();
        let patients = dir.path().join("patients.csv");
        std::fs::write(
            &patients,
            "patient,tumor_type,tmb_nonsyn,apm\np1,SKCM,76,0.4\np2,SKCM,NA,0.1\n",
        )
        .unwrap();
        let orr = dir.path().join("orr.csv");
        std::fs::write(&orr, "tumor_type,ORR,Patients_ORR\nSKCM,0.35,400\nLUAD,,\n").unwrap();
        let p = read_patients(&patients).unwrap();
        assert_eq!(p[0].tmb_nonsyn, Some(76.0));
        assert_eq!(p[1].tmb_nonsyn, None);
        let o = read_orr(&orr).unwrap();
        assert_eq!(o[1].orr, None);
        assert_eq!(o[0].patients_orr, Some(400));

        let out = dir.path().join("summary.csv");
        write_summaries(&merge_orr(&summarize_by_tumor_type(&score_patients(&p)), &o), &out)
            .unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("tumor_type,Patients_TIGS,TIGS,Patients_APS,APS,Patients_TMB,TMB,ORR,Patients_ORR")
        );
    }
}
