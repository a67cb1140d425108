//! Persistence of ensemble aggregates and per-case series
//!
//! Two backends implement [`AggregateStore`]: [`NetCdfStore`] keeps one NetCDF
//! file per key under a data directory, [`MemoryStore`] keeps everything in a
//! map. Reading a key that was never written yields
//! [`EnsStatError::AggregateNotFound`].

use crate::errors::{EnsStatError, Result};
use crate::model::{Cycle, CycleKey, Extraction, FileType, SeriesKey};
use crate::statistics::operations::{DomainSeries, EnsembleAggregate, MemberSeries};
use chrono::Utc;
use ndarray::Array2;
use netcdf::{AttributeValue, FileMut};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Key-value store for pipeline products. Writes overwrite the whole key.
pub trait AggregateStore: Send + Sync {
    fn put_aggregate(&self, key: &CycleKey, aggregate: &EnsembleAggregate) -> Result<()>;
    fn get_aggregate(&self, key: &CycleKey) -> Result<EnsembleAggregate>;
    fn has_aggregate(&self, key: &CycleKey) -> bool;

    fn put_domain_series(&self, key: &SeriesKey, series: &DomainSeries) -> Result<()>;
    fn get_domain_series(&self, key: &SeriesKey) -> Result<DomainSeries>;
    fn has_domain_series(&self, key: &SeriesKey) -> bool;

    fn put_member_series(&self, key: &SeriesKey, series: &MemberSeries) -> Result<()>;
    fn get_member_series(&self, key: &SeriesKey) -> Result<MemberSeries>;
}

fn not_found(what: &str, key: &dyn std::fmt::Display) -> EnsStatError {
    EnsStatError::AggregateNotFound {
        key: format!("{what} {key}"),
    }
}

/// Grid size of an aggregate whose two maps agree in shape
fn aggregate_dims(aggregate: &EnsembleAggregate) -> Result<(usize, usize)> {
    let dims = aggregate.mean.dim();
    if aggregate.std.dim() != dims {
        return Err(EnsStatError::ShapeMismatch {
            index: 1,
            expected: vec![dims.0, dims.1],
            found: aggregate.std.shape().to_vec(),
        });
    }
    Ok(dims)
}

fn invalid_entry(path: &Path, reason: impl Into<String>) -> EnsStatError {
    EnsStatError::InvalidStoreEntry {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn int_attribute(file: &netcdf::File, name: &str) -> Option<i64> {
    match file.attribute(name)?.value().ok()? {
        AttributeValue::Short(n) => Some(i64::from(n)),
        AttributeValue::Int(n) => Some(i64::from(n)),
        AttributeValue::Longlong(n) => Some(n),
        _ => None,
    }
}

fn str_attribute(file: &netcdf::File, name: &str) -> Option<String> {
    match file.attribute(name)?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| EnsStatError::StatisticsError(format!("{what} too large")))
}

/// One NetCDF file per key under `root`
#[derive(Debug, Clone)]
pub struct NetCdfStore {
    root: PathBuf,
}

impl NetCdfStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn aggregate_path(&self, key: &CycleKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    #[must_use]
    pub fn domain_series_path(&self, key: &SeriesKey) -> PathBuf {
        self.root.join(key.domain_mean_file_name())
    }

    #[must_use]
    pub fn member_series_path(&self, key: &SeriesKey) -> PathBuf {
        self.root.join(key.member_series_file_name())
    }

    /// Writes through a temporary sibling and renames it into place, so a
    /// failed write never leaves a file under the final name
    fn write_atomically(
        path: &Path,
        case_id: u32,
        variable: &str,
        build: impl FnOnce(&mut FileMut) -> Result<()>,
    ) -> Result<()> {
        let tmp = path.with_extension("nc.tmp");
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        let written = (|| -> Result<()> {
            let mut file = netcdf::create(&tmp)?;
            build(&mut file)?;
            file.add_attribute("case_id", i64::from(case_id))?;
            file.add_attribute("variable", variable)?;
            file.add_attribute(
                "history",
                format!("Created by ens_stat on {}", Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), "Failed to remove partial file: {cleanup}");
            }
            return Err(e);
        }

        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Wrote store entry");
        Ok(())
    }

    fn open_entry(path: &Path, what: &str, key: &dyn std::fmt::Display) -> Result<netcdf::File> {
        if !path.is_file() {
            return Err(not_found(what, key));
        }
        Ok(netcdf::open(path)?)
    }

    fn read_f64(file: &netcdf::File, name: &str, path: &Path) -> Result<Vec<f64>> {
        let var = file
            .variable(name)
            .ok_or_else(|| EnsStatError::VariableNotFound {
                var: name.to_string(),
                path: path.to_path_buf(),
            })?;
        Ok(var.get_values::<f64, _>(..)?)
    }

    fn read_cycles(file: &netcdf::File, path: &Path) -> Result<Vec<Cycle>> {
        let var = file
            .variable("cycle")
            .ok_or_else(|| EnsStatError::VariableNotFound {
                var: "cycle".to_string(),
                path: path.to_path_buf(),
            })?;
        var.get_values::<i64, _>(..)?
            .into_iter()
            .map(Cycle::from_number)
            .collect()
    }

    fn write_cycles(file: &mut FileMut, cycles: &[Cycle]) -> Result<()> {
        let numbers: Vec<i64> = cycles.iter().map(Cycle::as_number).collect();
        let mut var = file.add_variable::<i64>("cycle", &["cycle"])?;
        var.put_attribute("long_name", "cycle initialization time")?;
        var.put_attribute("units", "YYYYMMDDHH")?;
        var.put_values(&numbers, ..)?;
        Ok(())
    }
}

fn require_cycles(cycles: &[Cycle], key: &SeriesKey) -> Result<()> {
    // a zero-length NetCDF dimension would be created as unlimited
    if cycles.is_empty() {
        return Err(EnsStatError::StatisticsError(format!(
            "refusing to store an empty series for {key}"
        )));
    }
    Ok(())
}

impl AggregateStore for NetCdfStore {
    fn put_aggregate(&self, key: &CycleKey, aggregate: &EnsembleAggregate) -> Result<()> {
        let (ny, nx) = aggregate_dims(aggregate)?;
        let members = to_i32(aggregate.members, "member count")?;

        Self::write_atomically(
            &self.aggregate_path(key),
            key.case_id,
            &key.variable,
            |file| {
                file.add_dimension("y", ny)?;
                file.add_dimension("x", nx)?;
                for (name, field) in [("mean", &aggregate.mean), ("std", &aggregate.std)] {
                    let mut var = file.add_variable::<f64>(name, &["y", "x"])?;
                    var.put_attribute("long_name", format!("ensemble {name} of {}", key.variable))?;
                    var.put(field.view(), ..)?;
                }
                file.add_attribute("cycle", key.cycle.stamp())?;
                file.add_attribute("members", members)?;
                if let Some(extraction) = aggregate.extraction {
                    file.add_attribute("layer", to_i32(extraction.layer, "layer")?)?;
                    file.add_attribute("file_type", extraction.file_type.as_str())?;
                    file.add_attribute("forecast_hour", i64::from(extraction.forecast_hour))?;
                }
                Ok(())
            },
        )
    }

    fn get_aggregate(&self, key: &CycleKey) -> Result<EnsembleAggregate> {
        let path = self.aggregate_path(key);
        let file = Self::open_entry(&path, "ensemble aggregate", key)?;

        let var = file
            .variable("mean")
            .ok_or_else(|| EnsStatError::VariableNotFound {
                var: "mean".to_string(),
                path: path.clone(),
            })?;
        let shape: Vec<usize> = var.dimensions().iter().map(netcdf::Dimension::len).collect();
        if shape.len() != 2 {
            return Err(EnsStatError::DimensionMismatch {
                var: "mean".to_string(),
                expected: "(y, x)".to_string(),
                found: shape,
            });
        }
        let (ny, nx) = (shape[0], shape[1]);

        let members = int_attribute(&file, "members")
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| invalid_entry(&path, "missing or invalid 'members' attribute"))?;

        let extraction = match (
            int_attribute(&file, "layer"),
            str_attribute(&file, "file_type"),
            int_attribute(&file, "forecast_hour"),
        ) {
            (None, None, None) => None,
            (Some(layer), Some(file_type), Some(hour)) => Some(Extraction {
                layer: usize::try_from(layer)
                    .map_err(|_| invalid_entry(&path, format!("layer {layer}")))?,
                file_type: FileType::from_name(&file_type)
                    .ok_or_else(|| invalid_entry(&path, format!("file type '{file_type}'")))?,
                forecast_hour: u32::try_from(hour)
                    .map_err(|_| invalid_entry(&path, format!("forecast hour {hour}")))?,
            }),
            _ => {
                return Err(invalid_entry(
                    &path,
                    "layer, file_type and forecast_hour must be stored together",
                ))
            }
        };

        Ok(EnsembleAggregate {
            mean: Array2::from_shape_vec((ny, nx), Self::read_f64(&file, "mean", &path)?)?,
            std: Array2::from_shape_vec((ny, nx), Self::read_f64(&file, "std", &path)?)?,
            members,
            extraction,
        })
    }

    fn has_aggregate(&self, key: &CycleKey) -> bool {
        self.aggregate_path(key).is_file()
    }

    fn put_domain_series(&self, key: &SeriesKey, series: &DomainSeries) -> Result<()> {
        require_cycles(&series.cycles, key)?;
        Self::write_atomically(
            &self.domain_series_path(key),
            key.case_id,
            &key.variable,
            |file| {
                file.add_dimension("cycle", series.len())?;
                Self::write_cycles(file, &series.cycles)?;
                for (name, values) in [("mean", &series.mean), ("std", &series.std)] {
                    let mut var = file.add_variable::<f64>(name, &["cycle"])?;
                    var.put_attribute(
                        "long_name",
                        format!("domain mean of the ensemble {name} of {}", key.variable),
                    )?;
                    var.put_values(values, ..)?;
                }
                Ok(())
            },
        )
    }

    fn get_domain_series(&self, key: &SeriesKey) -> Result<DomainSeries> {
        let path = self.domain_series_path(key);
        let file = Self::open_entry(&path, "domain-mean series", key)?;
        DomainSeries::new(
            Self::read_cycles(&file, &path)?,
            Self::read_f64(&file, "mean", &path)?,
            Self::read_f64(&file, "std", &path)?,
        )
    }

    fn has_domain_series(&self, key: &SeriesKey) -> bool {
        self.domain_series_path(key).is_file()
    }

    fn put_member_series(&self, key: &SeriesKey, series: &MemberSeries) -> Result<()> {
        require_cycles(&series.cycles, key)?;
        Self::write_atomically(
            &self.member_series_path(key),
            key.case_id,
            &key.variable,
            |file| {
                file.add_dimension("member", series.members())?;
                file.add_dimension("cycle", series.cycles.len())?;
                Self::write_cycles(file, &series.cycles)?;
                for (name, values) in [("mean", &series.mean), ("std", &series.std)] {
                    let mut var = file.add_variable::<f64>(name, &["member", "cycle"])?;
                    var.put_attribute(
                        "long_name",
                        format!("spatial {name} of each member's {}", key.variable),
                    )?;
                    var.put(values.view(), ..)?;
                }
                Ok(())
            },
        )
    }

    fn get_member_series(&self, key: &SeriesKey) -> Result<MemberSeries> {
        let path = self.member_series_path(key);
        let file = Self::open_entry(&path, "member series", key)?;
        let cycles = Self::read_cycles(&file, &path)?;
        let members = file
            .dimension("member")
            .map(|d| d.len())
            .ok_or_else(|| EnsStatError::DimensionMismatch {
                var: "member".to_string(),
                expected: "a member dimension".to_string(),
                found: vec![],
            })?;
        let shape = (members, cycles.len());
        let mean = Array2::from_shape_vec(shape, Self::read_f64(&file, "mean", &path)?)?;
        let std = Array2::from_shape_vec(shape, Self::read_f64(&file, "std", &path)?)?;
        MemberSeries::new(cycles, mean, std)
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    aggregates: Mutex<HashMap<CycleKey, EnsembleAggregate>>,
    domain_series: Mutex<HashMap<SeriesKey, DomainSeries>>,
    member_series: Mutex<HashMap<SeriesKey, MemberSeries>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted ensemble aggregates
    #[must_use]
    pub fn aggregate_count(&self) -> usize {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn lookup<K, V>(map: &Mutex<HashMap<K, V>>, key: &K, what: &str) -> Result<V>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
        .ok_or_else(|| not_found(what, key))
}

fn insert<K: std::hash::Hash + Eq, V>(map: &Mutex<HashMap<K, V>>, key: K, value: V) {
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, value);
}

impl AggregateStore for MemoryStore {
    fn put_aggregate(&self, key: &CycleKey, aggregate: &EnsembleAggregate) -> Result<()> {
        aggregate_dims(aggregate)?;
        insert(&self.aggregates, key.clone(), aggregate.clone());
        Ok(())
    }

    fn get_aggregate(&self, key: &CycleKey) -> Result<EnsembleAggregate> {
        lookup(&self.aggregates, key, "ensemble aggregate")
    }

    fn has_aggregate(&self, key: &CycleKey) -> bool {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn put_domain_series(&self, key: &SeriesKey, series: &DomainSeries) -> Result<()> {
        require_cycles(&series.cycles, key)?;
        insert(&self.domain_series, key.clone(), series.clone());
        Ok(())
    }

    fn get_domain_series(&self, key: &SeriesKey) -> Result<DomainSeries> {
        lookup(&self.domain_series, key, "domain-mean series")
    }

    fn has_domain_series(&self, key: &SeriesKey) -> bool {
        self.domain_series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn put_member_series(&self, key: &SeriesKey, series: &MemberSeries) -> Result<()> {
        require_cycles(&series.cycles, key)?;
        insert(&self.member_series, key.clone(), series.clone());
        Ok(())
    }

    fn get_member_series(&self, key: &SeriesKey) -> Result<MemberSeries> {
        lookup(&self.member_series, key, "member series")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use tempfile::tempdir;

    fn cycle(stamp: &str) -> Cycle {
        Cycle::parse(stamp).unwrap()
    }

    fn aggregate() -> EnsembleAggregate {
        EnsembleAggregate {
            mean: arr2(&[[290.125, 1.0 / 3.0, 0.1], [f64::MIN_POSITIVE, 1e300, -7.25]]),
            std: arr2(&[[0.0, 2.0_f64.sqrt(), 0.3], [1e-12, 5.5, f64::NAN]]),
            members: 20,
            extraction: Some(Extraction {
                layer: 65,
                file_type: FileType::Dyn,
                forecast_hour: 3,
            }),
        }
    }

    fn assert_bit_identical(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn netcdf_aggregate_round_trip_is_bit_identical() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = NetCdfStore::new(dir.path()).unwrap();
        let key = CycleKey::new(53, "tmp", cycle("2021091503"));
        let original = aggregate();

        assert!(!store.has_aggregate(&key));
        store.put_aggregate(&key, &original).unwrap();
        assert!(store.has_aggregate(&key));
        assert!(dir
            .path()
            .join("ens_stat_case53_time_2021091503_tmp.nc")
            .is_file());

        let restored = store.get_aggregate(&key).unwrap();
        assert_bit_identical(&original.mean, &restored.mean);
        assert_bit_identical(&original.std, &restored.std);
        assert_eq!(restored.members, 20);
        assert_eq!(restored.extraction, original.extraction);
    }

    #[test]
    fn netcdf_overwrite_replaces_entry() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = NetCdfStore::new(dir.path()).unwrap();
        let key = CycleKey::new(54, "spfh", cycle("2021091600"));

        store.put_aggregate(&key, &aggregate()).unwrap();
        let replacement = EnsembleAggregate {
            mean: arr2(&[[1.0]]),
            std: arr2(&[[0.0]]),
            members: 1,
            extraction: None,
        };
        store.put_aggregate(&key, &replacement).unwrap();

        let restored = store.get_aggregate(&key).unwrap();
        assert_eq!(restored, replacement);
        assert!(!dir
            .path()
            .join("ens_stat_case54_time_2021091600_spfh.nc.tmp")
            .exists());
    }

    #[test]
    fn mismatched_maps_are_refused_by_both_stores() {
        let dir = tempdir().expect("Failed to create temp dir");
        let netcdf_store = NetCdfStore::new(dir.path()).unwrap();
        let memory_store = MemoryStore::new();
        let key = CycleKey::new(53, "tmp", cycle("2021091500"));
        let broken = EnsembleAggregate {
            mean: arr2(&[[1.0, 2.0]]),
            std: arr2(&[[0.0], [0.0]]),
            members: 2,
            extraction: None,
        };

        let stores: [&dyn AggregateStore; 2] = [&netcdf_store, &memory_store];
        for store in stores {
            assert!(matches!(
                store.put_aggregate(&key, &broken),
                Err(EnsStatError::ShapeMismatch { index: 1, .. })
            ));
            assert!(!store.has_aggregate(&key));
        }
    }

    #[test]
    fn entry_without_member_count_is_invalid() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = NetCdfStore::new(dir.path()).unwrap();
        let key = CycleKey::new(53, "tmp", cycle("2021091500"));
        {
            let mut file = netcdf::create(store.aggregate_path(&key)).unwrap();
            file.add_dimension("y", 1).unwrap();
            file.add_dimension("x", 2).unwrap();
            for name in ["mean", "std"] {
                let mut var = file.add_variable::<f64>(name, &["y", "x"]).unwrap();
                var.put_values(&[1.0, 2.0], ..).unwrap();
            }
        }

        match store.get_aggregate(&key) {
            Err(EnsStatError::InvalidStoreEntry { path, reason }) => {
                assert_eq!(path, store.aggregate_path(&key));
                assert!(reason.contains("members"), "{reason}");
            }
            other => panic!("Expected InvalidStoreEntry, got {other:?}"),
        }
    }

    #[test]
    fn netcdf_missing_keys_are_reported() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = NetCdfStore::new(dir.path()).unwrap();

        let key = CycleKey::new(53, "tmp", cycle("2021091500"));
        match store.get_aggregate(&key) {
            Err(EnsStatError::AggregateNotFound { key }) => {
                assert!(key.contains("case 53"));
                assert!(key.contains("2021091500"));
            }
            other => panic!("Expected AggregateNotFound, got {other:?}"),
        }
        assert!(matches!(
            store.get_domain_series(&SeriesKey::new(53, "tmp")),
            Err(EnsStatError::AggregateNotFound { .. })
        ));
    }

    #[test]
    fn netcdf_series_round_trip() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = NetCdfStore::new(dir.path()).unwrap();
        let key = SeriesKey::new(53, "tmp");
        let cycles = vec![cycle("2021091500"), cycle("2021091503"), cycle("2021091506")];

        let domain = DomainSeries::new(
            cycles.clone(),
            vec![290.0, 291.5, 292.25],
            vec![1.0, 1.25, 0.5],
        )
        .unwrap();
        store.put_domain_series(&key, &domain).unwrap();
        assert!(store.has_domain_series(&key));
        assert_eq!(store.get_domain_series(&key).unwrap(), domain);

        let members = MemberSeries::new(
            cycles,
            arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]),
            arr2(&[[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]),
        )
        .unwrap();
        store.put_member_series(&key, &members).unwrap();
        assert_eq!(store.get_member_series(&key).unwrap(), members);
    }

    #[test]
    fn empty_series_is_refused() {
        let store = MemoryStore::new();
        let empty = DomainSeries::new(vec![], vec![], vec![]).unwrap();
        assert!(store
            .put_domain_series(&SeriesKey::new(1, "tmp"), &empty)
            .is_err());
    }

    #[test]
    fn memory_store_behaves_like_a_map() {
        let store = MemoryStore::new();
        let key = CycleKey::new(1, "tmp", cycle("2021091500"));
        assert!(matches!(
            store.get_aggregate(&key),
            Err(EnsStatError::AggregateNotFound { .. })
        ));
        store.put_aggregate(&key, &aggregate()).unwrap();
        store.put_aggregate(&key, &aggregate()).unwrap();
        assert_eq!(store.aggregate_count(), 1);
        assert!(store.has_aggregate(&key));
    }
}
