use crate::error::IoError;
use crate::gsva::GsvaParams;
use crate::simulation::SimulationConfig;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline settings, every field has a default so a config file may be partial.
///
/// ```toml
/// [simulation]
/// repetitions = 100
/// sample_size = 500
/// randomizations_per_repetition = 10
/// seed = 666
///
/// [panels]
/// apm_set = "APM"
/// iis_set = "IIS"
///
/// [scorer]
/// kind = "gsva"
///
/// [scorer.gsva]
/// kcdf = true
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub simulation: SimulationSection,
    pub panels: PanelSection,
    pub scorer: ScorerSection,
    pub regression: RegressionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub repetitions: usize,
    pub sample_size: usize,
    pub randomizations_per_repetition: usize,
    pub seed: u64,
    /// 0: let rayon decide
    pub threads: usize,
}

impl Default for SimulationSection {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        SimulationSection {
            repetitions: sim.repetitions,
            sample_size: sim.sample_size,
            randomizations_per_repetition: sim.randomizations_per_repetition,
            seed: 666,
            threads: 0,
        }
    }
}

impl SimulationSection {
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            repetitions: self.repetitions,
            sample_size: self.sample_size,
            randomizations_per_repetition: self.randomizations_per_repetition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSection {
    pub gmt: Option<PathBuf>,
    pub apm_set: String,
    pub iis_set: String,
}

impl Default for PanelSection {
    fn default() -> Self {
        PanelSection {
            gmt: None,
            apm_set: "APM".to_string(),
            iis_set: "IIS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScorerKind {
    #[default]
    Gsva,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerSection {
    pub kind: ScorerKind,
    pub gsva: GsvaParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionSection {
    /// confidence level of prediction intervals
    pub level: f64,
}

impl Default for RegressionSection {
    fn default() -> Self {
        RegressionSection { level: 0.95 }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, IoError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(file_path: P) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(file_path)?;
        Self::from_toml(&text)
    }
}
