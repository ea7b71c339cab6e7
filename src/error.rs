use thiserror::Error;

/// Failure of a single scoring call. Recorded per trial, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("none of the genes of panel '{0}' are present in the expression subset")]
    EmptyPanel(String),
    #[error("panel '{panel}' covers all {n_genes} genes of the subset, the walk has no misses")]
    FullPanel { panel: String, n_genes: usize },
    #[error("expression subset has no samples")]
    NoSamples,
    #[error("scoring produced a non-finite value for panel '{0}'")]
    NonFinite(String),
}

/// Reasons a rank or linear correlation is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("columns have different lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("at least 2 observations are required, found {0}")]
    TooFewObservations(usize),
    #[error("input contains NaN or infinite values")]
    NonFinite,
    #[error("a column has fewer than 2 distinct values")]
    Constant,
}

/// Invalid simulation parameters, checked before any random draw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("sample size {requested} exceeds the {available} samples of the cohort")]
    SampleSizeTooLarge { requested: usize, available: usize },
    #[error("random panel of {requested} genes cannot be drawn from a universe of {available}")]
    PanelTooLarge { requested: usize, available: usize },
    #[error("canonical panel '{0}' is empty")]
    EmptyCanonicalPanel(String),
    #[error("'{0}' must be at least 1")]
    ZeroCount(&'static str),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegressionError {
    #[error("at least 3 complete rows are required, found {0}")]
    InsufficientData(usize),
    #[error("predictor has zero variance")]
    ConstantPredictor,
    #[error("response has zero variance")]
    ConstantResponse,
    #[error("predictor and response have different lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("confidence level must lie in (0, 1), got {0}")]
    InvalidLevel(f64),
}

/// Reading and writing of tables, gene sets and configuration files.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("line {line}: cannot parse '{value}' as a number")]
    Parse { line: usize, value: String },
    #[error("gene set '{0}' was not found in the GMT file")]
    MissingGeneSet(String),
    #[error("{0}")]
    Format(String),
}

/// Top level error of the `tigs` binary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Regression(#[from] RegressionError),
}
