//! Stage orchestration: extract, reduce, members and plot
//!
//! Stages always run in canonical order. Each one checks that the store holds
//! what it reads before doing any work, and any failure ends the run.

use crate::config::PipelineConfig;
use crate::errors::{EnsStatError, Result};
use crate::model::{Case, Cycle, CycleKey, MemberKey, SeriesKey};
use crate::netcdf_io::extract_layer;
use crate::parallel::ParallelConfig;
use crate::plot::{plot_field_map, plot_series_panels, SeriesPanel};
use crate::statistics::ensemble::EnsembleAccumulator;
use crate::statistics::{
    reduce_aggregate, spatial_stats, DomainSeries, EnsembleAggregate, EnsembleStat, MemberSeries,
};
use crate::store::AggregateStore;
use ndarray::Array2;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One step of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Read members, aggregate and persist one aggregate per (case, cycle)
    Extract,
    /// Reduce persisted aggregates to per-case domain-mean series
    Reduce,
    /// Spatial statistics of every member field, per case
    Members,
    /// Maps and time-series charts
    Plot,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Reduce, Stage::Members, Stage::Plot];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Reduce => "reduce",
            Self::Members => "members",
            Self::Plot => "plot",
        }
    }

    /// Sorts stages into run order and drops duplicates
    #[must_use]
    pub fn canonical(stages: &[Stage]) -> Vec<Stage> {
        let mut ordered = stages.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        ordered
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = EnsStatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            // aggregation happens while extracting
            "extract" | "aggregate" => Ok(Self::Extract),
            "reduce" | "domain-mean" => Ok(Self::Reduce),
            "members" => Ok(Self::Members),
            "plot" => Ok(Self::Plot),
            other => Err(EnsStatError::Config(format!(
                "Unknown stage '{}'. Valid stages: extract, reduce, members, plot",
                other
            ))),
        }
    }
}

/// What one stage did
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    /// Aggregates, series or figures written
    pub outputs: usize,
    pub elapsed: Duration,
}

/// A configured run over every case and cycle
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    cycles: Vec<Cycle>,
    store: &'a dyn AggregateStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a dyn AggregateStore) -> Result<Self> {
        config.validate()?;
        let cycles = config.cycles()?;
        Ok(Self {
            config,
            cycles,
            store,
        })
    }

    #[must_use]
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Runs the requested stages in canonical order
    pub fn run(&self, stages: &[Stage]) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for stage in Stage::canonical(stages) {
            self.check_prerequisites(stage)?;
            info!(stage = %stage, "Starting stage");
            let start = Instant::now();
            let outputs = match stage {
                Stage::Extract => self.extract()?,
                Stage::Reduce => self.reduce()?,
                Stage::Members => self.members()?,
                Stage::Plot => self.plot()?,
            };
            let elapsed = start.elapsed();
            info!(stage = %stage, outputs, ?elapsed, "Finished stage");
            reports.push(StageReport {
                stage,
                outputs,
                elapsed,
            });
        }
        Ok(reports)
    }

    fn cycle_key(&self, case: &Case, cycle: Cycle) -> CycleKey {
        CycleKey::new(case.id, &self.config.variable_name, cycle)
    }

    fn series_key(&self, case: &Case) -> SeriesKey {
        SeriesKey::new(case.id, &self.config.variable_name)
    }

    /// Fails with [`EnsStatError::AggregateNotFound`] for the first stored
    /// input `stage` reads that is absent
    pub fn check_prerequisites(&self, stage: Stage) -> Result<()> {
        let needs_aggregates = matches!(stage, Stage::Reduce | Stage::Plot);
        let needs_series = stage == Stage::Plot;

        for case in &self.config.cases {
            if needs_aggregates {
                for &cycle in &self.cycles {
                    let key = self.cycle_key(case, cycle);
                    if !self.store.has_aggregate(&key) {
                        return Err(EnsStatError::AggregateNotFound {
                            key: key.to_string(),
                        });
                    }
                }
            }
            if needs_series {
                let key = self.series_key(case);
                if !self.store.has_domain_series(&key) {
                    return Err(EnsStatError::AggregateNotFound {
                        key: format!("domain means of {key}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reads one member's layer, attaching the member identity to any error
    fn read_member(&self, key: &MemberKey<'_>) -> Result<Array2<f64>> {
        let path = key.forecast_path(self.config.file_type, self.config.forecast_hour);
        extract_layer(&path, &self.config.variable_name, self.config.layer_index)
            .map_err(|source| self.member_error(key, path, source))
    }

    fn member_error(
        &self,
        key: &MemberKey<'_>,
        path: PathBuf,
        source: EnsStatError,
    ) -> EnsStatError {
        EnsStatError::MemberRead {
            case_id: key.case.id,
            cycle: key.cycle.stamp(),
            member: key.member,
            var: self.config.variable_name.clone(),
            path,
            source: Box::new(source),
        }
    }

    /// Streams every member of one (case, cycle) through an accumulator
    pub fn aggregate_cycle(&self, case: &Case, cycle: Cycle) -> Result<EnsembleAggregate> {
        let mut accumulator = EnsembleAccumulator::new();
        for member in 1..=self.config.member_count {
            let key = MemberKey {
                case,
                cycle,
                member,
            };
            let sample = self.read_member(&key)?;
            accumulator.push(&sample).map_err(|source| {
                let path = key.forecast_path(self.config.file_type, self.config.forecast_hour);
                self.member_error(&key, path, source)
            })?;
        }
        let mut aggregate = accumulator.finish()?;
        aggregate.extraction = Some(self.config.extraction());
        Ok(aggregate)
    }

    /// Reads a stored aggregate and checks it was built with this run's
    /// member count and member slice
    fn load_aggregate(&self, key: &CycleKey) -> Result<EnsembleAggregate> {
        let aggregate = self.store.get_aggregate(key)?;
        let stale = |reason: String| EnsStatError::StaleAggregate {
            key: key.to_string(),
            reason,
        };

        if aggregate.members != self.config.member_count {
            return Err(stale(format!(
                "built from {} members, configured for {}",
                aggregate.members, self.config.member_count
            )));
        }
        let expected = self.config.extraction();
        match aggregate.extraction {
            Some(found) if found == expected => Ok(aggregate),
            Some(found) => Err(stale(format!("built from {found}, configured for {expected}"))),
            None => Err(stale(format!(
                "no record of the member slice, configured for {expected}"
            ))),
        }
    }

    /// Aggregates and persists every (case, cycle) unit on a worker pool
    pub fn extract(&self) -> Result<usize> {
        let units: Vec<(&Case, Cycle)> = self
            .config
            .cases
            .iter()
            .flat_map(|case| self.cycles.iter().map(move |&cycle| (case, cycle)))
            .collect();

        let pool = ParallelConfig::new(self.config.threads).build_pool()?;
        pool.install(|| {
            units.par_iter().try_for_each(|&(case, cycle)| {
                let aggregate = self.aggregate_cycle(case, cycle)?;
                let key = self.cycle_key(case, cycle);
                self.store.put_aggregate(&key, &aggregate)?;
                debug!(key = %key, members = aggregate.members, "Stored aggregate");
                Ok::<(), EnsStatError>(())
            })
        })?;

        info!(
            units = units.len(),
            members = self.config.member_count,
            "Extracted ensemble aggregates"
        );
        Ok(units.len())
    }

    /// Domain-mean series of every case from the stored aggregates
    pub fn reduce(&self) -> Result<usize> {
        for case in &self.config.cases {
            let mut mean = Vec::with_capacity(self.cycles.len());
            let mut std = Vec::with_capacity(self.cycles.len());
            for &cycle in &self.cycles {
                let aggregate = self.load_aggregate(&self.cycle_key(case, cycle))?;
                let reduced = reduce_aggregate(&aggregate)?;
                mean.push(reduced.mean);
                std.push(reduced.std);
            }
            let series = DomainSeries::new(self.cycles.clone(), mean, std)?;
            let key = self.series_key(case);
            self.store.put_domain_series(&key, &series)?;
            info!(key = %key, cycles = series.len(), "Stored domain-mean series");
        }
        Ok(self.config.cases.len())
    }

    /// Spatial mean and std of each member field, per case
    pub fn members(&self) -> Result<usize> {
        let pool = ParallelConfig::new(self.config.threads).build_pool()?;
        let members = self.config.member_count;

        for case in &self.config.cases {
            let columns: Vec<Vec<(f64, f64)>> = pool.install(|| {
                self.cycles
                    .par_iter()
                    .map(|&cycle| {
                        (1..=members)
                            .map(|member| {
                                let key = MemberKey {
                                    case,
                                    cycle,
                                    member,
                                };
                                spatial_stats(&self.read_member(&key)?)
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            let mut mean = Array2::zeros((members, self.cycles.len()));
            let mut std = Array2::zeros((members, self.cycles.len()));
            for (j, column) in columns.iter().enumerate() {
                for (i, &(m, s)) in column.iter().enumerate() {
                    mean[[i, j]] = m;
                    std[[i, j]] = s;
                }
            }

            let key = self.series_key(case);
            self.store
                .put_member_series(&key, &MemberSeries::new(self.cycles.clone(), mean, std)?)?;
            info!(key = %key, members, "Stored member series");
        }
        Ok(self.config.cases.len())
    }

    fn x_label(&self) -> String {
        let first = self.cycles.first().map(Cycle::stamp).unwrap_or_default();
        let gaps: Vec<i64> = self
            .cycles
            .windows(2)
            .map(|w| w[1].hours_since(w[0]))
            .collect();
        match gaps.first() {
            Some(&gap) if gaps.iter().all(|&g| g == gap) => {
                format!("Cycles every {gap}h from {first}")
            }
            _ => format!("Cycle index from {first}"),
        }
    }

    /// Maps of every stored aggregate plus the series charts
    pub fn plot(&self) -> Result<usize> {
        let out = &self.config.output_dir;
        fs::create_dir_all(out)?;
        let var = &self.config.variable_name;
        let title = self.config.figure_title();
        let mut written = 0;

        let ranges: Vec<(EnsembleStat, Option<(f64, f64)>)> = EnsembleStat::ALL
            .iter()
            .map(|&stat| {
                let range = self.config.value_range(stat);
                if range.is_none() {
                    warn!(
                        variable = %var,
                        stat = stat.as_str(),
                        "No value range configured; using the data range of each map"
                    );
                }
                (stat, range)
            })
            .collect();

        for case in &self.config.cases {
            for &cycle in &self.cycles {
                let aggregate = self.load_aggregate(&self.cycle_key(case, cycle))?;
                for &(stat, range) in &ranges {
                    let path = out.join(format!(
                        "Ens_{}_case{}_time_{}_{}.svg",
                        stat.title(),
                        case.id,
                        cycle,
                        var
                    ));
                    let map_title =
                        format!("{title}: Ens {} {} {}", stat.title(), case.legend(), cycle);
                    plot_field_map(aggregate.field(stat), &map_title, range, &path)?;
                    written += 1;
                }
            }
        }

        let mut domain = Vec::with_capacity(self.config.cases.len());
        for case in &self.config.cases {
            domain.push((case, self.store.get_domain_series(&self.series_key(case))?));
        }
        let panels: Vec<SeriesPanel> = EnsembleStat::ALL
            .iter()
            .map(|&stat| SeriesPanel {
                y_label: format!("Ensemble {}", stat.title()),
                lines: domain
                    .iter()
                    .map(|(case, series)| (case.legend(), series.values(stat).to_vec()))
                    .collect(),
                y_range: None,
            })
            .collect();
        let path = out.join(format!(
            "{}_layer_{}_ens_stat_dm.svg",
            var, self.config.layer_index
        ));
        plot_series_panels(&title, &self.x_label(), &panels, &path)?;
        written += 1;

        for case in &self.config.cases {
            let series = match self.store.get_member_series(&self.series_key(case)) {
                Ok(series) => series,
                Err(EnsStatError::AggregateNotFound { .. }) => {
                    debug!(case = case.id, "No member series stored; skipping chart");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let panels: Vec<SeriesPanel> = EnsembleStat::ALL
                .iter()
                .map(|&stat| SeriesPanel {
                    y_label: format!("Spatial {}", stat.title()),
                    lines: series
                        .values(stat)
                        .rows()
                        .into_iter()
                        .map(|row| (String::new(), row.to_vec()))
                        .collect(),
                    y_range: None,
                })
                .collect();
            let path = out.join(format!(
                "{}_layer_{}_case{}.svg",
                var, self.config.layer_index, case.id
            ));
            plot_series_panels(
                &format!("{title}: {}", case.legend()),
                &self.x_label(),
                &panels,
                &path,
            )?;
            written += 1;
        }

        info!(figures = written, dir = %out.display(), "Wrote figures");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Extraction;
    use crate::store::MemoryStore;
    use ndarray::arr2;
    use tempfile::tempdir;

    fn config(output_dir: PathBuf) -> PipelineConfig {
        let text = format!(
            r#"{{
                "cases": [{{"id": 7, "dir": "/nonexistent/case7", "label": "EnKF"}}],
                "cycle_schedule": ["2021091500", "2021091503"],
                "member_count": 2,
                "variable_name": "tmp",
                "layer_index": 1,
                "output_dir": {:?},
                "threads": 1
            }}"#,
            output_dir.display().to_string()
        );
        PipelineConfig::from_json_str(&text).unwrap()
    }

    fn seed_aggregates(store: &MemoryStore, pipeline: &Pipeline<'_>, case: &Case) {
        for (i, &cycle) in pipeline.cycles().iter().enumerate() {
            let base = 280.0 + i as f64;
            let aggregate = EnsembleAggregate {
                mean: arr2(&[[base, base + 2.0], [base + 4.0, base + 6.0]]),
                std: arr2(&[[1.0, 1.0], [1.0, 1.0]]),
                members: 2,
                extraction: Some(pipeline.config.extraction()),
            };
            store
                .put_aggregate(&CycleKey::new(case.id, "tmp", cycle), &aggregate)
                .unwrap();
        }
    }

    #[test]
    fn stages_parse_and_order() {
        assert_eq!("aggregate".parse::<Stage>().unwrap(), Stage::Extract);
        assert_eq!(" Plot ".parse::<Stage>().unwrap(), Stage::Plot);
        assert!("draw".parse::<Stage>().is_err());
        assert_eq!(
            Stage::canonical(&[Stage::Plot, Stage::Extract, Stage::Plot, Stage::Reduce]),
            vec![Stage::Extract, Stage::Reduce, Stage::Plot]
        );
    }

    #[test]
    fn reduce_without_aggregates_fails() {
        let config = config(PathBuf::from("unused"));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        let err = pipeline.run(&[Stage::Reduce]).unwrap_err();
        assert!(matches!(err, EnsStatError::AggregateNotFound { .. }));
        assert!(!store.has_domain_series(&SeriesKey::new(7, "tmp")));
    }

    #[test]
    fn reduce_builds_domain_series() {
        let config = config(PathBuf::from("unused"));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        seed_aggregates(&store, &pipeline, &config.cases[0]);

        let reports = pipeline.run(&[Stage::Reduce]).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outputs, 1);

        let series = store.get_domain_series(&SeriesKey::new(7, "tmp")).unwrap();
        assert_eq!(series.mean, vec![283.0, 284.0]);
        assert_eq!(series.std, vec![1.0, 1.0]);
        assert_eq!(series.cycles, pipeline.cycles());
    }

    #[test]
    fn reduce_and_plot_reject_aggregates_from_other_settings() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = config(dir.path().join("figures"));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        seed_aggregates(&store, &pipeline, &config.cases[0]);
        let key = CycleKey::new(7, "tmp", pipeline.cycles()[1]);
        let good = store.get_aggregate(&key).unwrap();

        let mut other_layer = good.clone();
        other_layer.extraction = Some(Extraction {
            layer: 3,
            ..config.extraction()
        });
        let unrecorded = EnsembleAggregate {
            extraction: None,
            ..good.clone()
        };
        let fewer_members = EnsembleAggregate {
            members: 1,
            ..good
        };

        // a previous series, so the plot stage gets past its prerequisites
        let series_key = SeriesKey::new(7, "tmp");
        let previous =
            DomainSeries::new(pipeline.cycles().to_vec(), vec![0.0; 2], vec![0.0; 2]).unwrap();
        store.put_domain_series(&series_key, &previous).unwrap();

        for (stale, hint) in [
            (other_layer, "layer 3"),
            (unrecorded, "no record"),
            (fewer_members, "1 members"),
        ] {
            store.put_aggregate(&key, &stale).unwrap();
            for stage in [Stage::Reduce, Stage::Plot] {
                match pipeline.run(&[stage]) {
                    Err(EnsStatError::StaleAggregate { key: k, reason }) => {
                        assert!(k.contains("2021091503"), "{k}");
                        assert!(reason.contains(hint), "{reason}");
                    }
                    other => panic!("{stage}: unexpected result {other:?}"),
                }
            }
        }
        assert_eq!(store.get_domain_series(&series_key).unwrap(), previous);
    }

    #[test]
    fn missing_member_files_carry_identity() {
        let config = config(PathBuf::from("unused"));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&config, &store).unwrap();

        let err = pipeline.run(&[Stage::Extract]).unwrap_err();
        match &err {
            EnsStatError::MemberRead {
                case_id, var, path, ..
            } => {
                assert_eq!(*case_id, 7);
                assert_eq!(var, "tmp");
                assert!(path.ends_with("fcst_fv3lam/dynf003.nc"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), EnsStatError::FileNotFound { .. }));
        assert_eq!(store.aggregate_count(), 0);
    }

    #[test]
    fn plot_writes_maps_and_series() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = config(dir.path().join("figures"));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        seed_aggregates(&store, &pipeline, &config.cases[0]);

        assert!(matches!(
            pipeline.check_prerequisites(Stage::Plot),
            Err(EnsStatError::AggregateNotFound { .. })
        ));

        let reports = pipeline.run(&[Stage::Plot, Stage::Reduce]).unwrap();
        assert_eq!(reports[1].stage, Stage::Plot);
        // two cycles x two statistics, plus the domain-mean chart
        assert_eq!(reports[1].outputs, 5);

        let figures = dir.path().join("figures");
        assert!(figures.join("Ens_Mean_case7_time_2021091503_tmp.svg").is_file());
        assert!(figures.join("Ens_STD_case7_time_2021091500_tmp.svg").is_file());
        assert!(figures.join("tmp_layer_1_ens_stat_dm.svg").is_file());
        assert_eq!(pipeline.x_label(), "Cycles every 3h from 2021091500");
    }
}
