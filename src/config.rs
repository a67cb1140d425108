//! Pipeline configuration
//!
//! Loaded from a JSON file and validated once at startup, then passed by
//! reference into every stage.

use crate::errors::{EnsStatError, Result};
use crate::model::{Case, Cycle, CycleSchedule, Extraction, FileType};
use crate::statistics::EnsembleStat;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_data_dir() -> PathBuf {
    PathBuf::from("data_output")
}

const fn default_forecast_hour() -> u32 {
    3
}

/// Colour or axis range per statistic for one variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ValueRanges {
    #[serde(default)]
    pub mean: Option<(f64, f64)>,
    #[serde(default)]
    pub std: Option<(f64, f64)>,
}

/// Everything a pipeline run needs to know
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub cases: Vec<Case>,
    pub cycle_schedule: CycleSchedule,
    pub member_count: usize,
    pub variable_name: String,
    /// 1-based model layer
    pub layer_index: usize,
    /// Where plots are written
    pub output_dir: PathBuf,
    /// Where the aggregate store lives
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default = "default_forecast_hour")]
    pub forecast_hour: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value_ranges: HashMap<String, ValueRanges>,
    /// Worker threads for the extract stage; all cores when absent
    #[serde(default)]
    pub threads: Option<usize>,
}

impl PipelineConfig {
    /// Reads and validates a JSON configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EnsStatError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        info!(
            path = %path.display(),
            cases = config.cases.len(),
            members = config.member_count,
            variable = %config.variable_name,
            layer = config.layer_index,
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the stages rely on
    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(EnsStatError::Config("case list is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert(case.id) {
                return Err(EnsStatError::Config(format!(
                    "case id {} listed more than once",
                    case.id
                )));
            }
        }
        if self.member_count == 0 {
            return Err(EnsStatError::Config(
                "member_count must be at least 1".to_string(),
            ));
        }
        if self.layer_index == 0 {
            return Err(EnsStatError::Config(
                "layer_index is 1-based and must be at least 1".to_string(),
            ));
        }
        if self.variable_name.trim().is_empty() {
            return Err(EnsStatError::Config("variable_name is empty".to_string()));
        }
        if self.threads == Some(0) {
            return Err(EnsStatError::Config("threads must be at least 1".to_string()));
        }
        self.cycles()?;
        Ok(())
    }

    /// The expanded, ordered cycle list
    pub fn cycles(&self) -> Result<Vec<Cycle>> {
        self.cycle_schedule.cycles()
    }

    /// The member slice every aggregate of this run is computed from
    #[must_use]
    pub fn extraction(&self) -> Extraction {
        Extraction {
            layer: self.layer_index,
            file_type: self.file_type,
            forecast_hour: self.forecast_hour,
        }
    }

    /// Figure title, defaulting to the variable and layer
    #[must_use]
    pub fn figure_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            format!(
                "Ensemble statistics for {} (layer {})",
                self.variable_name, self.layer_index
            )
        })
    }

    /// Value range for a statistic of the configured variable, if one is known
    #[must_use]
    pub fn value_range(&self, stat: EnsembleStat) -> Option<(f64, f64)> {
        let configured = self
            .value_ranges
            .get(&self.variable_name)
            .and_then(|r| match stat {
                EnsembleStat::Mean => r.mean,
                EnsembleStat::Std => r.std,
            });
        configured.or_else(|| default_value_range(&self.variable_name, stat))
    }
}

/// Ranges used for the near-surface FV3 fields when none are configured
#[must_use]
pub fn default_value_range(variable: &str, stat: EnsembleStat) -> Option<(f64, f64)> {
    match (variable, stat) {
        ("tmp", EnsembleStat::Mean) => Some((273.0, 310.0)),
        ("tmp", EnsembleStat::Std) => Some((0.0, 3.0)),
        ("spfh", EnsembleStat::Mean) => Some((0.00125, 0.02125)),
        ("spfh", EnsembleStat::Std) => Some((0.0, 0.004)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGULAR: &str = r#"{
        "cases": [
            {"id": 53, "dir": "/runs/case53", "label": "EFSOI"},
            {"id": 54, "dir": "/runs/case54", "label": "EnKF"}
        ],
        "cycle_schedule": {"start": "2021091500", "interval_hours": 3, "count": 16},
        "member_count": 20,
        "variable_name": "tmp",
        "layer_index": 65,
        "output_dir": "figures"
    }"#;

    #[test]
    fn parses_regular_schedule_with_defaults() {
        let config = PipelineConfig::from_json_str(REGULAR).unwrap();
        assert_eq!(config.cases.len(), 2);
        assert_eq!(config.cases[1].legend(), "Case 54: EnKF");
        assert_eq!(config.cycles().unwrap().len(), 16);
        assert_eq!(config.data_dir, PathBuf::from("data_output"));
        assert_eq!(config.file_type, FileType::Dyn);
        assert_eq!(config.forecast_hour, 3);
        assert_eq!(config.threads, None);
        assert_eq!(config.value_range(EnsembleStat::Mean), Some((273.0, 310.0)));
        assert_eq!(
            config.figure_title(),
            "Ensemble statistics for tmp (layer 65)"
        );
    }

    #[test]
    fn parses_explicit_schedule_and_overrides() {
        let text = r#"{
            "cases": [{"id": 1, "dir": "/runs/a"}],
            "cycle_schedule": ["2021091500", "2021091512"],
            "member_count": 3,
            "variable_name": "soilw1",
            "layer_index": 1,
            "output_dir": "out",
            "data_dir": "store",
            "file_type": "phy",
            "forecast_hour": 6,
            "title": "Soil moisture",
            "value_ranges": {"soilw1": {"std": [0.0, 0.05]}},
            "threads": 2
        }"#;
        let config = PipelineConfig::from_json_str(text).unwrap();
        let cycles = config.cycles().unwrap();
        assert_eq!(cycles[1].stamp(), "2021091512");
        assert_eq!(config.file_type, FileType::Phy);
        assert_eq!(config.value_range(EnsembleStat::Std), Some((0.0, 0.05)));
        assert_eq!(config.value_range(EnsembleStat::Mean), None);
        assert_eq!(config.figure_title(), "Soil moisture");
        assert_eq!(config.extraction().to_string(), "layer 1 of phyf006");
    }

    #[test]
    fn rejects_invalid_values() {
        let broken = [
            REGULAR.replace("\"member_count\": 20", "\"member_count\": 0"),
            REGULAR.replace("\"layer_index\": 65", "\"layer_index\": 0"),
            REGULAR.replace("\"id\": 54", "\"id\": 53"),
            REGULAR.replace("\"count\": 16", "\"count\": 0"),
            REGULAR.replace("\"variable_name\": \"tmp\"", "\"variable_name\": \" \""),
        ];
        for text in &broken {
            assert!(
                matches!(
                    PipelineConfig::from_json_str(text),
                    Err(EnsStatError::Config(_))
                ),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn rejects_unknown_fields_and_bad_json() {
        let unknown = REGULAR.replace("\"member_count\"", "\"size_member\": 2, \"member_count\"");
        assert!(matches!(
            PipelineConfig::from_json_str(&unknown),
            Err(EnsStatError::JsonError(_))
        ));
        assert!(PipelineConfig::from_json_str("{").is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let result = PipelineConfig::from_path(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(EnsStatError::FileNotFound { .. })));
    }
}
