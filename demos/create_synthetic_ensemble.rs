//! Creates a small synthetic FV3 ensemble and a matching pipeline configuration.
//!
//! Layout: `<root>/case<ID>/<YYYYMMDDHH>/mem<NNNN>/fcst_fv3lam/dynf003.nc`, each file
//! holding `tmp(time, pfull, grid_yt, grid_xt)`. Also writes a UFO-style
//! observation file for the `hofx` and `omb` commands.
//!
//! Usage: `cargo run --example create_synthetic_ensemble -- [ROOT]`

use ndarray::{Array1, Array4};
use netcdf::create;
use std::fs;
use std::path::{Path, PathBuf};

const LEVELS: usize = 5;
const NY: usize = 12;
const NX: usize = 16;
const MEMBERS: usize = 4;
const CYCLES: [&str; 4] = ["2021091500", "2021091503", "2021091506", "2021091509"];
const CASES: [(u32, &str); 2] = [(53, "EFSOI"), (54, "EnKF")];

fn write_member(
    path: &Path,
    case: u32,
    cycle: usize,
    member: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    let mut file = create(path)?;
    file.add_attribute("title", "Synthetic FV3-LAM forecast")?;
    file.add_dimension("time", 1)?;
    file.add_dimension("pfull", LEVELS)?;
    file.add_dimension("grid_yt", NY)?;
    file.add_dimension("grid_xt", NX)?;

    let mut var = file.add_variable::<f32>("tmp", &["time", "pfull", "grid_yt", "grid_xt"])?;
    var.put_attribute("units", "K")?;
    var.put_attribute("long_name", "temperature")?;

    // warm near the surface, a diurnal swing per cycle and a member perturbation
    let spread = 0.3 * (member as f32 - (MEMBERS as f32 + 1.0) / 2.0);
    let offset = if case == 54 { 0.5 } else { 0.0 };
    let data = Array4::from_shape_fn((1, LEVELS, NY, NX), |(_, k, j, i)| {
        let lapse = 6.5 * (LEVELS - 1 - k) as f32;
        let gradient = 10.0 * j as f32 / NY as f32;
        let wave = (i as f32 * 0.4 + cycle as f32).sin();
        300.0 - lapse - gradient + wave + spread + offset
    });
    var.put(data.view(), ..)?;
    Ok(())
}

fn write_observations(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    let n = 200;
    let mut file = create(path)?;
    file.add_dimension("nlocs", n)?;

    let ufo = Array1::from_shape_fn(n, |i| 280.0 + (i as f32 * 0.1).sin() * 5.0);
    let gsi = Array1::from_shape_fn(n, |i| ufo[i] + if i % 50 == 0 { 0.01 } else { 0.0001 });
    let gsi_bc = Array1::from_shape_fn(n, |i| gsi[i] + 0.05 * (i as f32 * 0.3).cos());
    let height = Array1::from_shape_fn(n, |i| 10.0 + 50.0 * i as f32);
    let latitude = Array1::from_shape_fn(n, |i| 25.0 + 0.1 * i as f32);
    let longitude = Array1::from_shape_fn(n, |i| -100.0 + 0.1 * i as f32);

    for (name, values) in [
        ("air_temperature@hofx", &ufo),
        ("air_temperature@GsiHofX", &gsi),
        ("air_temperature@GsiHofXBc", &gsi_bc),
        ("height@MetaData", &height),
        ("latitude@MetaData", &latitude),
        ("longitude@MetaData", &longitude),
    ] {
        let mut var = file.add_variable::<f32>(name, &["nlocs"])?;
        var.put(values.view(), ..)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("synthetic_ensemble"), PathBuf::from);

    println!("🔨 Creating synthetic ensemble under {}", root.display());

    let mut cases = Vec::new();
    for (id, label) in CASES {
        let case_dir = root.join(format!("case{id}"));
        for (c, cycle) in CYCLES.iter().enumerate() {
            for member in 1..=MEMBERS {
                let dir = case_dir
                    .join(cycle)
                    .join(format!("mem{member:04}"))
                    .join("fcst_fv3lam");
                fs::create_dir_all(&dir)?;
                write_member(&dir.join("dynf003.nc"), id, c, member)?;
            }
        }
        cases.push(serde_json::json!({"id": id, "dir": case_dir, "label": label}));
    }

    let config = serde_json::json!({
        "cases": cases,
        "cycle_schedule": {"start": CYCLES[0], "interval_hours": 3, "count": CYCLES.len()},
        "member_count": MEMBERS,
        "variable_name": "tmp",
        "layer_index": LEVELS,
        "output_dir": root.join("figures"),
        "data_dir": root.join("data_output"),
    });
    let config_path = root.join("run.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    let obs_path = root.join("ufo_sfc.nc");
    write_observations(&obs_path)?;

    println!("✅ Wrote {} member files", CASES.len() * CYCLES.len() * MEMBERS);
    println!("   📏 tmp(time=1, pfull={LEVELS}, grid_yt={NY}, grid_xt={NX})");
    println!("\n🧪 Try:");
    println!(
        "   cargo run -- run --config {} --stages extract,reduce,members,plot",
        config_path.display()
    );
    println!("   cargo run -- hofx {} sfc air_temperature demo", obs_path.display());
    println!("   cargo run -- omb {} sfc air_temperature --threshold 0.001", obs_path.display());
    Ok(())
}
