use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tigs::aggregate::{aggregate, read_result_set, write_result_set};
use tigs::simulation::{run_simulation, ExpressionMatrix, GenePanel, MeanScorer, SimulationConfig};

fn cohort(n_samples: usize, n_genes: usize) -> ExpressionMatrix {
    let mut rng = SmallRng::seed_from_u64(1000);
    let genes: Vec<String> = (0..n_genes).map(|g| format!("GENE{g}")).collect();
    let samples: Vec<String> = (0..n_samples).map(|s| format!("TCGA-{s:04}")).collect();
    let values = (0..n_samples)
        .map(|_| (0..n_genes).map(|_| rng.gen_range(0.0..16.0)).collect())
        .collect();
    ExpressionMatrix::new(samples, &genes, values).unwrap()
}

fn panel(name: &str, range: std::ops::Range<usize>) -> GenePanel {
    let genes: Vec<String> = range.map(|g| format!("GENE{g}")).collect();
    GenePanel::new(name, &genes)
}

#[test]
fn mean_scorer_end_to_end() {
    let matrix = cohort(1000, 1000);
    let apm = panel("APM", 0..5);
    let iis = panel("IIS", 5..10);
    let config = SimulationConfig {
        repetitions: 3,
        randomizations_per_repetition: 2,
        ..SimulationConfig::default()
    };
    assert_eq!(config.sample_size, 500);

    let mut rng = SmallRng::seed_from_u64(2021);
    let result = run_simulation(&matrix, &apm, &iis, matrix.genes(), &config, &MeanScorer, &mut rng)
        .unwrap();
    assert!(result.repetitions.iter().all(|r| r.samples.len() == 500));

    let set = aggregate(&result);
    assert_eq!(set.len(), 3);
    for (rec, diag) in set.records.iter().zip(set.diagnostics.iter()) {
        assert!((-1.0..=1.0).contains(&rec.normal));
        assert!((-1.0..=1.0).contains(&rec.random_IIS));
        assert!((-1.0..=1.0).contains(&rec.random_APS));
        assert_eq!((diag.iis_used, diag.iis_skipped), (2, 0));
        assert_eq!((diag.aps_used, diag.aps_skipped), (2, 0));
    }
    assert_eq!(set.excluded_trials(), (0, 0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("random_genes.csv");
    write_result_set(&set, &path).unwrap();
    let back = read_result_set(&path).unwrap();
    assert_eq!(back.len(), 3);
    for (a, b) in set.records.iter().zip(back.iter()) {
        assert!((a.normal - b.normal).abs() < 1e-9);
        assert!((a.random_IIS - b.random_IIS).abs() < 1e-9);
        assert!((a.random_APS - b.random_APS).abs() < 1e-9);
    }
}
