use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use tigs::aggregate::{aggregate, write_diagnostics, write_result_set};
use tigs::config::{PipelineConfig, ScorerKind};
use tigs::error::{IoError, PipelineError};
use tigs::gsva::GsvaScorer;
use tigs::regression::{
    fit_orr_models, merge_orr, read_orr, read_patients, score_patients, summarize_by_tumor_type,
    write_summaries, Predictor,
};
use tigs::simulation::{run_simulation, ExpressionMatrix, GenePanel, MeanScorer, Scorer};
use tigs::utils::read_gmt;

/// Random gene panel robustness check and TIGS/ORR regression
#[derive(Parser, Debug)]
#[command(name = "tigs", version, about = "Random gene panel robustness check and TIGS/ORR regression", long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file, command line flags take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Correlate APM and IIS scores of canonical and random gene panels
    Simulate(SimulateArgs),
    /// Summarize TIGS per tumor type and regress ORR on it
    Regress(RegressArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Expression table, genes as rows, samples as columns
    #[arg(short, long)]
    expr: PathBuf,
    /// GMT file holding the APM and IIS sets
    #[arg(short, long)]
    gmt: Option<PathBuf>,
    /// Output table (normal, random_IIS, random_APS)
    #[arg(short, long)]
    output: PathBuf,
    /// Per repetition trial counts
    #[arg(long)]
    diagnostics: Option<PathBuf>,
    /// Field delimiter of the expression table
    #[arg(long, default_value_t = '\t')]
    delimiter: char,
    #[arg(short, long)]
    repetitions: Option<usize>,
    #[arg(long)]
    sample_size: Option<usize>,
    #[arg(long)]
    randomizations: Option<usize>,
    #[arg(long, value_enum)]
    scorer: Option<ScorerKind>,
    #[arg(short, long)]
    seed: Option<u64>,
    #[arg(short, long)]
    threads: Option<usize>,
}

#[derive(Args, Debug)]
struct RegressArgs {
    /// Patient table: patient, tumor_type, tmb_nonsyn, apm
    #[arg(short, long)]
    patients: PathBuf,
    /// Curated response rates: tumor_type, ORR, Patients_ORR
    #[arg(long)]
    orr: PathBuf,
    /// Merged per tumor type table
    #[arg(short, long)]
    output: PathBuf,
    /// TIGS values to predict ORR for
    #[arg(long)]
    tigs: Vec<f64>,
    /// Confidence level of the predictions
    #[arg(long)]
    level: Option<f64>,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn run_simulate(args: SimulateArgs, mut cfg: PipelineConfig) -> Result<(), PipelineError> {
    let sim = &mut cfg.simulation;
    if let Some(v) = args.repetitions {
        sim.repetitions = v;
    }
    if let Some(v) = args.sample_size {
        sim.sample_size = v;
    }
    if let Some(v) = args.randomizations {
        sim.randomizations_per_repetition = v;
    }
    if let Some(v) = args.seed {
        sim.seed = v;
    }
    if let Some(v) = args.threads {
        sim.threads = v;
    }
    if let Some(kind) = args.scorer {
        cfg.scorer.kind = kind;
    }
    if cfg.simulation.threads > 0 {
        // set thread number global
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.simulation.threads)
            .build_global()
        {
            warn!("thread pool already initialised: {e}");
        }
    }

    let delimiter = u8::try_from(args.delimiter)
        .map_err(|_| IoError::Format(format!("delimiter '{}' is not ASCII", args.delimiter)))?;
    let matrix = ExpressionMatrix::read(&args.expr, delimiter)?;
    let gmt_path = args
        .gmt
        .or_else(|| cfg.panels.gmt.clone())
        .ok_or_else(|| IoError::Format("no GMT file given (--gmt or [panels].gmt)".to_string()))?;
    let gene_sets = read_gmt(&gmt_path)?;
    let get = |name: &str| {
        gene_sets
            .get(name)
            .map(|g| GenePanel::new(name, g))
            .ok_or_else(|| IoError::MissingGeneSet(name.to_string()))
    };
    let apm = get(cfg.panels.apm_set.as_str())?;
    let iis = get(cfg.panels.iis_set.as_str())?;
    info!("APM panel: {} genes, IIS panel: {} genes", apm.len(), iis.len());

    let scorer: Box<dyn Scorer> = match cfg.scorer.kind {
        ScorerKind::Gsva => Box::new(GsvaScorer::new(cfg.scorer.gsva)),
        ScorerKind::Mean => Box::new(MeanScorer),
    };
    let mut rng = SmallRng::seed_from_u64(cfg.simulation.seed);
    let result = run_simulation(
        &matrix,
        &apm,
        &iis,
        matrix.genes(),
        &cfg.simulation.simulation_config(),
        scorer.as_ref(),
        &mut rng,
    )?;
    let set = aggregate(&result);
    write_result_set(&set, &args.output)?;
    info!("Wrote {} records to {}", set.len(), args.output.display());
    if let Some(path) = args.diagnostics {
        write_diagnostics(&set, &path)?;
    }
    Ok(())
}

fn run_regress(args: RegressArgs, cfg: PipelineConfig) -> Result<(), PipelineError> {
    let level = args.level.unwrap_or(cfg.regression.level);
    let patients = read_patients(&args.patients)?;
    let orr = read_orr(&args.orr)?;
    info!(
        "Loaded {} patients and {} ORR records",
        patients.len(),
        orr.len()
    );
    let table = merge_orr(&summarize_by_tumor_type(&score_patients(&patients)), &orr);
    write_summaries(&table, &args.output)?;

    let fits = fit_orr_models(&table);
    println!("predictor\tslope\tintercept\tr\tr_squared\tp_value\tn\texcluded");
    for f in fits.iter() {
        if let Ok(fit) = &f.fit {
            println!(
                "{}\t{:.6}\t{:.6}\t{:.4}\t{:.4}\t{:.3e}\t{}\t{}",
                f.predictor.name(),
                fit.slope,
                fit.intercept,
                fit.r,
                fit.r_squared,
                fit.slope_p_value,
                fit.n,
                f.excluded
            );
        }
    }
    if !args.tigs.is_empty() {
        let model = fits
            .iter()
            .find(|f| f.predictor == Predictor::Tigs)
            .map(|f| f.fit.clone());
        match model {
            Some(Ok(fit)) => {
                println!("TIGS\tORR\tlower\tupper");
                for &x in args.tigs.iter() {
                    let p = fit.predict(x, level)?;
                    println!("{:.4}\t{:.4}\t{:.4}\t{:.4}", p.x, p.fit, p.lower, p.upper);
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => {}
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let start = Instant::now();

    let cfg = match cli.config.as_ref().map(PipelineConfig::load).transpose() {
        Ok(cfg) => cfg.unwrap_or_default(),
        Err(e) => {
            error!("Error reading config: {e}");
            std::process::exit(1);
        }
    };
    let result = match cli.command {
        Commands::Simulate(args) => run_simulate(args, cfg),
        Commands::Regress(args) => run_regress(args, cfg),
    };
    if let Err(e) = result {
        error!("Error: {e}");
        std::process::exit(1);
    }
    info!("Overall run time: {:.2?}", start.elapsed());
}
