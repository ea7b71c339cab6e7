//! Gene-set randomization and TIGS/ORR regression for immunotherapy biomarker studies.
//!
//! The simulation draws random patient subsets, scores the canonical APM and
//! IIS panels next to random panels of equal size, and the aggregator turns
//! each repetition into one row of Spearman correlations.

// import own modules
pub mod aggregate;
pub mod config;
pub mod error;
pub mod gsva;
pub mod regression;
pub mod simulation;
pub mod stats;
pub mod utils;

#[cfg(feature = "extension-module")]
mod python;

// export module fn, struct, trait ...
pub use aggregate::{aggregate, read_result_set, write_result_set, CorrelationRecord, ResultSet};
pub use error::{CorrelationError, IoError, RegressionError, ScoreError, SimulationError};
pub use gsva::{GsvaParams, GsvaScorer};
pub use regression::{fit_ols, fit_orr_models, LinearFit, Prediction, TumorTypeSummary};
pub use simulation::{
    run_simulation, ExpressionMatrix, GenePanel, MeanScorer, PanelPair, ScoreTable, Scorer,
    SimulationConfig, SimulationResult,
};
pub use stats::spearman;
