use crate::error::IoError;
use crate::simulation::SimulationResult;
use crate::stats::{spearman, MeanOfValid};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// One row of the persisted result table.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    /// rho(normal APM, normal IIS)
    pub normal: f64,
    /// mean over trials of rho(normal APM, random IIS)
    pub random_IIS: f64,
    /// mean over trials of rho(random APM, normal IIS)
    pub random_APS: f64,
}

/// How many trials went into each mean of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RepetitionDiagnostics {
    pub repetition: usize,
    pub normal_failed: bool,
    pub iis_used: usize,
    pub iis_skipped: usize,
    pub aps_used: usize,
    pub aps_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub records: Vec<CorrelationRecord>,
    pub diagnostics: Vec<RepetitionDiagnostics>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// (skipped trials for random_IIS, skipped trials for random_APS)
    pub fn excluded_trials(&self) -> (usize, usize) {
        self.diagnostics.iter().fold((0, 0), |(i, a), d| {
            (i + d.iis_skipped, a + d.aps_skipped)
        })
    }
}

/// Reduce every repetition to one correlation record.
///
/// A trial whose scoring failed, or whose correlation is undefined, is left
/// out of both means of its repetition. When the normal scores are missing
/// the whole record is NaN.
pub fn aggregate(result: &SimulationResult) -> ResultSet {
    let mut set = ResultSet::default();
    for rep in result.repetitions.iter() {
        let mut diag = RepetitionDiagnostics {
            repetition: rep.index,
            ..Default::default()
        };
        let record = match &rep.normal {
            Ok(normal) => {
                let rho = spearman(&normal.apm, &normal.iis);
                if let Err(e) = &rho {
                    warn!("repetition {}: normal correlation undefined: {e}", rep.index);
                }
                let mut iis = MeanOfValid::new();
                let mut aps = MeanOfValid::new();
                for trial in rep.random.iter() {
                    match &trial.scores {
                        Ok(random) => {
                            iis.push(spearman(&normal.apm, &random.iis));
                            aps.push(spearman(&random.apm, &normal.iis));
                        }
                        Err(_) => {
                            iis.skipped += 1;
                            aps.skipped += 1;
                        }
                    }
                }
                diag.normal_failed = rho.is_err();
                diag.iis_used = iis.used;
                diag.iis_skipped = iis.skipped;
                diag.aps_used = aps.used;
                diag.aps_skipped = aps.skipped;
                CorrelationRecord {
                    normal: rho.unwrap_or(f64::NAN),
                    random_IIS: iis.mean(),
                    random_APS: aps.mean(),
                }
            }
            Err(_) => {
                diag.normal_failed = true;
                diag.iis_skipped = rep.random.len();
                diag.aps_skipped = rep.random.len();
                CorrelationRecord {
                    normal: f64::NAN,
                    random_IIS: f64::NAN,
                    random_APS: f64::NAN,
                }
            }
        };
        set.records.push(record);
        set.diagnostics.push(diag);
    }
    let (iis_skipped, aps_skipped) = set.excluded_trials();
    info!(
        "Aggregated {} repetitions, excluded trials: random_IIS {}, random_APS {}",
        set.len(),
        iis_skipped,
        aps_skipped
    );
    set
}

pub const RESULT_HEADER: [&str; 3] = ["normal", "random_IIS", "random_APS"];

/// NaN is written as `NaN`. The header is written even for an empty slice.
pub fn write_records<W: Write>(records: &[CorrelationRecord], writer: W) -> Result<(), IoError> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(RESULT_HEADER)?;
    for rec in records {
        wtr.serialize(rec)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_records<R: Read>(reader: R) -> Result<Vec<CorrelationRecord>, IoError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut records = Vec::new();
    for rec in rdr.deserialize() {
        records.push(rec?);
    }
    Ok(records)
}

pub fn write_result_set<P: AsRef<Path>>(set: &ResultSet, file_path: P) -> Result<(), IoError> {
    let file = std::fs::File::create(file_path)?;
    write_records(&set.records, file)
}

pub fn read_result_set<P: AsRef<Path>>(file_path: P) -> Result<Vec<CorrelationRecord>, IoError> {
    let file = std::fs::File::open(file_path)?;
    read_records(file)
}

/// per repetition diagnostics next to the result table
pub fn write_diagnostics<P: AsRef<Path>>(set: &ResultSet, file_path: P) -> Result<(), IoError> {
    let mut wtr = csv::WriterBuilder::new().from_path(file_path)?;
    for d in set.diagnostics.iter() {
        wtr.serialize(d)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoreError;
    use crate::simulation::tests::{panel, toy_cohort};
    use crate::simulation::{
        run_simulation, MeanScorer, PanelPair, Repetition, ScoreTable, SimulationConfig, Trial,
    };
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn trial(scores: Result<ScoreTable, ScoreError>) -> Trial {
        Trial {
            panels: PanelPair {
                apm: panel("random_APM", &[]),
                iis: panel("random_IIS", &[]),
            },
            scores,
        }
    }

    fn result_of(reps: Vec<Repetition>, k: usize) -> SimulationResult {
        SimulationResult {
            config: SimulationConfig {
                repetitions: reps.len(),
                sample_size: 5,
                randomizations_per_repetition: k,
            },
            repetitions: reps,
        }
    }

    fn normal_table() -> ScoreTable {
        ScoreTable {
            apm: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            iis: vec![2.0, 1.0, 4.0, 3.0, 5.0],
        }
    }

    #[test]
    fn test_degenerate_randomization_equals_normal() {
        let rep = Repetition {
            index: 1,
            samples: vec![0, 1, 2, 3, 4],
            normal: Ok(normal_table()),
            random: vec![trial(Ok(normal_table())), trial(Ok(normal_table()))],
        };
        let set = aggregate(&result_of(vec![rep], 2));
        let r = set.records[0];
        assert!((r.normal - 0.8).abs() < 1e-12);
        assert_eq!(r.random_IIS, r.normal);
        assert_eq!(r.random_APS, r.normal);
        assert_eq!(set.diagnostics[0].iis_used, 2);
    }

    #[test]
    fn test_failed_trials_are_excluded() {
        let constant = ScoreTable {
            apm: vec![1.0; 5],
            iis: vec![3.0, 2.0, 1.0, 5.0, 4.0],
        };
        let reversed = ScoreTable {
            apm: vec![5.0, 4.0, 3.0, 2.0, 1.0],
            iis: vec![5.0, 4.0, 3.0, 2.0, 1.0],
        };
        let rep = Repetition {
            index: 1,
            samples: vec![0, 1, 2, 3, 4],
            normal: Ok(normal_table()),
            random: vec![
                trial(Err(ScoreError::NonFinite("random_APM".to_string()))),
                trial(Ok(constant)),
                trial(Ok(reversed)),
            ],
        };
        let set = aggregate(&result_of(vec![rep], 3));
        let r = set.records[0];
        let d = set.diagnostics[0];
        // IIS: constant trial is valid for the IIS role, reversed gives -1
        assert_eq!((d.iis_used, d.iis_skipped), (2, 1));
        // APS: constant APM column is undefined
        assert_eq!((d.aps_used, d.aps_skipped), (1, 2));
        let rho_const = spearman(&normal_table().apm, &[3.0, 2.0, 1.0, 5.0, 4.0]).unwrap();
        assert!((r.random_IIS - (rho_const - 1.0) / 2.0).abs() < 1e-12);
        assert!((r.random_APS + 0.8).abs() < 1e-12);
        assert_eq!(set.excluded_trials(), (1, 2));
    }

    #[test]
    fn test_all_trials_failed_is_nan() {
        let rep = Repetition {
            index: 1,
            samples: vec![],
            normal: Ok(normal_table()),
            random: vec![trial(Err(ScoreError::NoSamples)); 2],
        };
        let failed_normal = Repetition {
            index: 2,
            samples: vec![],
            normal: Err(ScoreError::NoSamples),
            random: vec![trial(Ok(normal_table()))],
        };
        let set = aggregate(&result_of(vec![rep, failed_normal], 2));
        assert!(!set.records[0].normal.is_nan());
        assert!(set.records[0].random_IIS.is_nan());
        assert!(set.records[0].random_APS.is_nan());
        assert!(set.records[1].normal.is_nan());
        assert!(set.diagnostics[1].normal_failed);
    }

    #[test]
    fn test_round_trip() {
        let records = vec![
            CorrelationRecord {
                normal: 0.123456789012345,
                random_IIS: -0.000_001_234_567_89,
                random_APS: 1.0 / 3.0,
            },
            CorrelationRecord {
                normal: f64::NAN,
                random_IIS: 0.5,
                random_APS: -1.0,
            },
        ];
        let mut buf: Vec<u8> = Vec::new();
        write_records(&records, &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().next(), Some("normal,random_IIS,random_APS"));
        let back = read_records(buf.as_slice()).unwrap();
        assert_eq!(back.len(), 2);
        for (a, b) in records.iter().zip(back.iter()) {
            for (x, y) in [
                (a.normal, b.normal),
                (a.random_IIS, b.random_IIS),
                (a.random_APS, b.random_APS),
            ] {
                assert!((x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_empty_result_set_keeps_header() {
        let mut buf: Vec<u8> = Vec::new();
        write_records(&[], &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["normal,random_IIS,random_APS"]);
        assert!(read_records(buf.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_seeded_pipeline_is_byte_identical() {
        let m = toy_cohort(80, 60, 11);
        let apm = panel("APM", &["G0", "G1", "G2"]);
        let iis = panel("IIS", &["G3", "G4", "G5"]);
        let config = SimulationConfig {
            repetitions: 5,
            sample_size: 40,
            randomizations_per_repetition: 4,
        };
        let bytes = |seed: u64| {
            let mut rng = SmallRng::seed_from_u64(seed);
            let res = run_simulation(&m, &apm, &iis, m.genes(), &config, &MeanScorer, &mut rng)
                .unwrap();
            let mut buf = Vec::new();
            write_records(&aggregate(&res).records, &mut buf).unwrap();
            buf
        };
        assert_eq!(bytes(2024), bytes(2024));
    }
}
