//! Structured identities for cases, cycles and members
//!
//! Every file the pipeline touches is located through one of the keys in this
//! module, so the naming conventions live in exactly one place.

use crate::errors::{EnsStatError, Result};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Format used for cycle stamps in paths and on the command line
pub const CYCLE_FORMAT: &str = "%Y%m%d%H";

/// One experiment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: u32,
    pub dir: PathBuf,
    /// Legend label, e.g. `EFSOI` or `EnKF`
    #[serde(default)]
    pub label: Option<String>,
}

impl Case {
    /// Label used in plot legends
    #[must_use]
    pub fn legend(&self) -> String {
        match &self.label {
            Some(label) => format!("Case {}: {}", self.id, label),
            None => format!("Case {}", self.id),
        }
    }
}

/// A forecast initialization time, hour resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cycle(NaiveDateTime);

impl Cycle {
    /// Parses a `YYYYMMDDHH` stamp
    pub fn parse(stamp: &str) -> Result<Self> {
        if stamp.len() != 10 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EnsStatError::Config(format!(
                "Invalid cycle '{stamp}': expected YYYYMMDDHH"
            )));
        }
        // chrono needs minutes to build a NaiveDateTime
        let time = NaiveDateTime::parse_from_str(&format!("{stamp}00"), "%Y%m%d%H%M")
            .map_err(|e| EnsStatError::Config(format!("Invalid cycle '{stamp}': {e}")))?;
        Ok(Self(time))
    }

    #[must_use]
    pub fn stamp(&self) -> String {
        self.0.format(CYCLE_FORMAT).to_string()
    }

    /// Numeric form of the stamp, stored alongside domain-mean series
    #[must_use]
    pub fn as_number(&self) -> i64 {
        // a ten-digit stamp always fits in i64
        self.stamp().parse().unwrap_or_default()
    }

    /// Inverse of [`Cycle::as_number`]
    pub fn from_number(value: i64) -> Result<Self> {
        Self::parse(&format!("{value:010}"))
    }

    #[must_use]
    pub fn offset_hours(&self, hours: i64) -> Self {
        Self(self.0 + Duration::hours(hours))
    }

    /// Whole hours from `earlier` to this cycle
    #[must_use]
    pub fn hours_since(&self, earlier: Cycle) -> i64 {
        (self.0 - earlier.0).num_hours()
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stamp())
    }
}

/// Cycle schedule as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CycleSchedule {
    /// Explicit list of `YYYYMMDDHH` stamps
    List(Vec<String>),
    /// Regular schedule starting at `start`
    Regular {
        start: String,
        interval_hours: u32,
        count: usize,
    },
}

impl CycleSchedule {
    /// Expands the schedule into an ordered list of cycles
    pub fn cycles(&self) -> Result<Vec<Cycle>> {
        let cycles = match self {
            Self::List(stamps) => stamps
                .iter()
                .map(|s| Cycle::parse(s))
                .collect::<Result<Vec<_>>>()?,
            Self::Regular {
                start,
                interval_hours,
                count,
            } => {
                if *interval_hours == 0 && *count > 1 {
                    return Err(EnsStatError::Config(
                        "interval_hours must be positive for a multi-cycle schedule".to_string(),
                    ));
                }
                let first = Cycle::parse(start)?;
                (0..*count)
                    .map(|i| first.offset_hours(i as i64 * i64::from(*interval_hours)))
                    .collect()
            }
        };

        if cycles.is_empty() {
            return Err(EnsStatError::Config("Cycle schedule is empty".to_string()));
        }
        if cycles.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EnsStatError::Config(
                "Cycle schedule must be strictly increasing".to_string(),
            ));
        }
        Ok(cycles)
    }
}

/// Forecast file family: `dyn` holds tmp/spfh/ugrd/vgrd, `phy` holds soil fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Dyn,
    Phy,
}

impl FileType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dyn => "dyn",
            Self::Phy => "phy",
        }
    }

    /// Inverse of [`FileType::as_str`]
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dyn" => Some(Self::Dyn),
            "phy" => Some(Self::Phy),
            _ => None,
        }
    }
}

/// Which slice of the member forecasts an aggregate was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    /// 1-based model layer
    pub layer: usize,
    pub file_type: FileType,
    pub forecast_hour: u32,
}

impl fmt::Display for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "layer {} of {}f{:03}",
            self.layer,
            self.file_type.as_str(),
            self.forecast_hour
        )
    }
}

/// Identity of one member forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberKey<'a> {
    pub case: &'a Case,
    pub cycle: Cycle,
    /// 1-based member index
    pub member: usize,
}

impl MemberKey<'_> {
    /// `<case>/<YYYYMMDDHH>/mem<NNNN>/fcst_fv3lam/<type>f<FFF>.nc`
    #[must_use]
    pub fn forecast_path(&self, file_type: FileType, forecast_hour: u32) -> PathBuf {
        self.case
            .dir
            .join(self.cycle.stamp())
            .join(format!("mem{:04}", self.member))
            .join("fcst_fv3lam")
            .join(format!("{}f{forecast_hour:03}.nc", file_type.as_str()))
    }
}

/// Key of one persisted Ensemble Aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleKey {
    pub case_id: u32,
    pub variable: String,
    pub cycle: Cycle,
}

impl CycleKey {
    #[must_use]
    pub fn new(case_id: u32, variable: &str, cycle: Cycle) -> Self {
        Self {
            case_id,
            variable: variable.to_string(),
            cycle,
        }
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "ens_stat_case{}_time_{}_{}.nc",
            self.case_id, self.cycle, self.variable
        )
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "case {} / {} / cycle {}",
            self.case_id, self.variable, self.cycle
        )
    }
}

/// Key of a per-case series (domain means or member series)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub case_id: u32,
    pub variable: String,
}

impl SeriesKey {
    #[must_use]
    pub fn new(case_id: u32, variable: &str) -> Self {
        Self {
            case_id,
            variable: variable.to_string(),
        }
    }

    #[must_use]
    pub fn domain_mean_file_name(&self) -> String {
        format!(
            "ens_stat_case{}_domain_mean_{}.nc",
            self.case_id, self.variable
        )
    }

    #[must_use]
    pub fn member_series_file_name(&self) -> String {
        format!("ens_stat_case{}_{}.nc", self.case_id, self.variable)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "case {} / {}", self.case_id, self.variable)
    }
}
