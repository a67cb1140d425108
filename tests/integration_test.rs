use ens_stat::config::PipelineConfig;
use ens_stat::errors::EnsStatError;
use ens_stat::model::{Cycle, CycleKey, SeriesKey};
use ens_stat::pipeline::{Pipeline, Stage};
use ens_stat::store::{AggregateStore, NetCdfStore};
use ndarray::Array4;
use netcdf::create;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CYCLES: [&str; 2] = ["2021091500", "2021091503"];

/// Writes `tmp(time=1, pfull, grid_yt, grid_xt)` where the level at
/// `layer` (1-based) holds `value` and every other level holds 1000
fn write_member(path: &Path, levels: usize, ny: usize, nx: usize, layer: usize, value: f32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = create(path).expect("Failed to create NetCDF file");
    file.add_dimension("time", 1).unwrap();
    file.add_dimension("pfull", levels).unwrap();
    file.add_dimension("grid_yt", ny).unwrap();
    file.add_dimension("grid_xt", nx).unwrap();
    let mut var = file
        .add_variable::<f32>("tmp", &["time", "pfull", "grid_yt", "grid_xt"])
        .unwrap();
    let data = Array4::from_shape_fn((1, levels, ny, nx), |(_, k, _, _)| {
        if k + 1 == layer {
            value
        } else {
            1000.0
        }
    });
    var.put(data.view(), ..).unwrap();
}

fn member_path(case_dir: &Path, cycle: &str, member: usize) -> std::path::PathBuf {
    case_dir
        .join(cycle)
        .join(format!("mem{member:04}"))
        .join("fcst_fv3lam")
        .join("dynf003.nc")
}

fn config(root: &Path, members: usize, layer: usize, cycles: &[&str]) -> PipelineConfig {
    let json = serde_json::json!({
        "cases": [{"id": 53, "dir": root.join("case53"), "label": "EFSOI"}],
        "cycle_schedule": cycles,
        "member_count": members,
        "variable_name": "tmp",
        "layer_index": layer,
        "output_dir": root.join("figures"),
        "data_dir": root.join("data_output"),
        "threads": 2
    });
    PipelineConfig::from_json_str(&json.to_string()).expect("Failed to parse config")
}

#[test]
fn test_full_pipeline_on_synthetic_members() {
    let dir = tempdir().expect("Failed to create temp dir");
    let case_dir = dir.path().join("case53");
    // members 1, 3, 5 at layer 2
    for cycle in CYCLES {
        for member in 1..=3 {
            let value = (2 * member - 1) as f32;
            write_member(&member_path(&case_dir, cycle, member), 3, 4, 5, 2, value);
        }
    }

    let config = config(dir.path(), 3, 2, &CYCLES);
    let store = NetCdfStore::new(&config.data_dir).unwrap();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let reports = pipeline
        .run(&[Stage::Plot, Stage::Members, Stage::Extract, Stage::Reduce])
        .unwrap();
    let stages: Vec<Stage> = reports.iter().map(|r| r.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert_eq!(reports[0].outputs, 2);

    let expected_std = (8.0f64 / 3.0).sqrt();
    for cycle in CYCLES {
        let key = CycleKey::new(53, "tmp", Cycle::parse(cycle).unwrap());
        assert!(store.aggregate_path(&key).is_file());
        let aggregate = store.get_aggregate(&key).unwrap();
        assert_eq!(aggregate.members, 3);
        assert_eq!(aggregate.shape(), &[4, 5]);
        assert!(aggregate.mean.iter().all(|&v| (v - 3.0).abs() < 1e-12));
        assert!(aggregate
            .std
            .iter()
            .all(|&v| ((v - expected_std) / expected_std).abs() < 1e-9));
    }

    let series_key = SeriesKey::new(53, "tmp");
    let domain = store.get_domain_series(&series_key).unwrap();
    assert_eq!(domain.len(), 2);
    assert!((domain.mean[1] - 3.0).abs() < 1e-12);
    assert!((domain.std[0] - expected_std).abs() < 1e-9);

    let members = store.get_member_series(&series_key).unwrap();
    assert_eq!(members.members(), 3);
    assert_eq!(members.mean[[0, 0]], 1.0);
    assert_eq!(members.mean[[2, 1]], 5.0);
    assert!(members.std.iter().all(|&v| v == 0.0));

    let figures = dir.path().join("figures");
    assert!(figures.join("Ens_Mean_case53_time_2021091500_tmp.svg").is_file());
    assert!(figures.join("Ens_STD_case53_time_2021091503_tmp.svg").is_file());
    assert!(figures.join("tmp_layer_2_ens_stat_dm.svg").is_file());
    assert!(figures.join("tmp_layer_2_case53.svg").is_file());
}

#[test]
fn test_layer_out_of_range_fails_before_aggregation() {
    let dir = tempdir().expect("Failed to create temp dir");
    let case_dir = dir.path().join("case53");
    for member in 1..=2 {
        write_member(&member_path(&case_dir, CYCLES[0], member), 65, 2, 3, 1, 280.0);
    }

    let config = config(dir.path(), 2, 70, &CYCLES[..1]);
    let store = NetCdfStore::new(&config.data_dir).unwrap();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let err = pipeline.run(&[Stage::Extract]).unwrap_err();
    assert!(matches!(err, EnsStatError::MemberRead { member: 1, .. }));
    assert!(matches!(
        err.root(),
        EnsStatError::LayerOutOfRange {
            layer: 70,
            levels: 65,
            ..
        }
    ));
    let key = CycleKey::new(53, "tmp", Cycle::parse(CYCLES[0]).unwrap());
    assert!(!store.has_aggregate(&key));
}

#[test]
fn test_shape_mismatch_writes_nothing() {
    let dir = tempdir().expect("Failed to create temp dir");
    let case_dir = dir.path().join("case53");
    write_member(&member_path(&case_dir, CYCLES[0], 1), 3, 4, 5, 1, 1.0);
    write_member(&member_path(&case_dir, CYCLES[0], 2), 3, 4, 6, 1, 2.0);

    let config = config(dir.path(), 2, 1, &CYCLES[..1]);
    let store = NetCdfStore::new(&config.data_dir).unwrap();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let err = pipeline.run(&[Stage::Extract]).unwrap_err();
    assert!(matches!(err, EnsStatError::MemberRead { member: 2, .. }));
    assert!(matches!(err.root(), EnsStatError::ShapeMismatch { .. }));

    let key = CycleKey::new(53, "tmp", Cycle::parse(CYCLES[0]).unwrap());
    assert!(!store.has_aggregate(&key));
    assert_eq!(fs::read_dir(store.root()).unwrap().count(), 0);
}

#[test]
fn test_reduce_requires_aggregates() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = config(dir.path(), 3, 1, &CYCLES);
    let store = NetCdfStore::new(&config.data_dir).unwrap();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    for stage in [Stage::Reduce, Stage::Plot] {
        let err = pipeline.run(&[stage]).unwrap_err();
        match err {
            EnsStatError::AggregateNotFound { key } => {
                assert!(key.contains("case 53"), "{key}");
                assert!(key.contains("2021091500"), "{key}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert!(!store.has_domain_series(&SeriesKey::new(53, "tmp")));
    assert!(!dir.path().join("figures").exists());
}

#[test]
fn test_stages_rerun_from_persisted_aggregates() {
    let dir = tempdir().expect("Failed to create temp dir");
    let case_dir = dir.path().join("case53");
    for cycle in CYCLES {
        for member in 1..=2 {
            write_member(&member_path(&case_dir, cycle, member), 2, 3, 3, 1, member as f32);
        }
    }
    let config = config(dir.path(), 2, 1, &CYCLES);

    {
        let store = NetCdfStore::new(&config.data_dir).unwrap();
        Pipeline::new(&config, &store)
            .unwrap()
            .run(&[Stage::Extract])
            .unwrap();
    }

    // the member files are not needed once aggregates are stored
    fs::remove_dir_all(&case_dir).unwrap();

    let store = NetCdfStore::new(&config.data_dir).unwrap();
    let reports = Pipeline::new(&config, &store)
        .unwrap()
        .run(&[Stage::Reduce])
        .unwrap();
    assert_eq!(reports.len(), 1);
    let domain = store.get_domain_series(&SeriesKey::new(53, "tmp")).unwrap();
    assert_eq!(domain.mean, vec![1.5, 1.5]);
    assert_eq!(domain.std, vec![0.5, 0.5]);
}

#[test]
fn test_stored_aggregates_must_match_the_run() {
    let dir = tempdir().expect("Failed to create temp dir");
    let case_dir = dir.path().join("case53");
    for member in 1..=3 {
        write_member(&member_path(&case_dir, CYCLES[0], member), 2, 3, 3, 1, member as f32);
    }

    let extracted = config(dir.path(), 2, 1, &CYCLES[..1]);
    let store = NetCdfStore::new(&extracted.data_dir).unwrap();
    Pipeline::new(&extracted, &store)
        .unwrap()
        .run(&[Stage::Extract])
        .unwrap();

    for (members, layer, hint) in [(3, 1, "2 members"), (2, 2, "layer 1 of dynf003")] {
        let config = config(dir.path(), members, layer, &CYCLES[..1]);
        let pipeline = Pipeline::new(&config, &store).unwrap();
        match pipeline.run(&[Stage::Reduce]) {
            Err(EnsStatError::StaleAggregate { key, reason }) => {
                assert!(key.contains("2021091500"), "{key}");
                assert!(reason.contains(hint), "{reason}");
            }
            other => panic!("{members} members, layer {layer}: {other:?}"),
        }
    }
    assert!(!store.has_domain_series(&SeriesKey::new(53, "tmp")));
    assert!(!dir.path().join("figures").exists());

    // re-extracting with the new settings makes the store usable again
    let rerun = config(dir.path(), 3, 1, &CYCLES[..1]);
    let reports = Pipeline::new(&rerun, &store)
        .unwrap()
        .run(&[Stage::Extract, Stage::Reduce])
        .unwrap();
    assert_eq!(reports.len(), 2);
    let domain = store.get_domain_series(&SeriesKey::new(53, "tmp")).unwrap();
    assert_eq!(domain.mean, vec![2.0]);
}
