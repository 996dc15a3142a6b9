//! Save/load behaviour of the persisted state, profile, and template files.

use std::fs;
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use hhd_core::{Config, Settings};
use hhd_persist::{
    state::{load_profile, load_state, save_profile, save_state},
    HashStore, ProfileStore, WriteResult,
};
use rstest::rstest;
use serde_yaml::Value;
use tempfile::TempDir;

fn settings() -> Settings {
    Settings::from_yaml(
        r#"
controllers:
  type: container
  children:
    xinput:
      type: mode
      default: ds5e
      modes:
        disabled: { type: container }
        ds5e:
          type: container
          children:
            led_support: { type: bool, default: true }
            paddles: { type: multiple, options: { hidden: Hidden, shown: Shown }, default: hidden }
    gyro_scaling: { type: int, min: 1, max: 100, default: 40 }
    deadzone: { type: float, min: 0.0, max: 0.5, default: 0.1 }
"#,
    )
    .expect("schema")
}

fn conf_from(yaml: &str) -> Config {
    Config::from_value(serde_yaml::from_str::<Value>(yaml).expect("yaml")).expect("mapping")
}

// ---------------------------------------------------------------------------
// 1. Round trip
// ---------------------------------------------------------------------------

#[rstest]
#[case("single_leaf", "controllers: { gyro_scaling: 77 }")]
#[case("mode_and_child", "controllers: { xinput: { mode: disabled, ds5e: { paddles: shown } } }")]
#[case("float", "controllers: { deadzone: 0.35 }")]
#[case("with_undeclared", "controllers: { gyro_scaling: 5, legacy_toggle: true }")]
fn profile_round_trip_matches_on_declared_paths(#[case] label: &str, #[case] yaml: &str) {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("racer.yml");
    let settings = settings();
    let original = conf_from(yaml);

    let mut store = HashStore::new();
    save_profile(&path, &settings, &original, &mut store)
        .unwrap_or_else(|e| panic!("[{label}] save failed: {e}"));
    let reloaded =
        load_profile(&path, &settings).unwrap_or_else(|e| panic!("[{label}] load failed: {e}"));

    for leaf in settings.leaves() {
        assert_eq!(
            original.get(&leaf.path),
            reloaded.get(&leaf.path),
            "[{label}] mismatch at {}",
            leaf.path
        );
    }
    assert!(!reloaded.contains("controllers.legacy_toggle"), "[{label}]");
}

// ---------------------------------------------------------------------------
// 2. Diff-gated writes
// ---------------------------------------------------------------------------

#[test]
fn saving_unchanged_state_twice_writes_once() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("state.yml");
    let settings = settings();
    let conf = settings.defaults();
    let mut store = HashStore::new();

    let results = [
        save_state(&path, &settings, &conf, &mut store).expect("first save"),
        save_state(&path, &settings, &conf, &mut store).expect("second save"),
    ];
    let writes = results.iter().filter(|r| r.written()).count();
    assert_eq!(writes, 1);
}

#[test]
fn unchanged_save_preserves_mtime_across_restarts() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("state.yml");
    let settings = settings();
    let conf = settings.defaults();

    save_state(&path, &settings, &conf, &mut HashStore::new()).expect("first save");
    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    set_file_mtime(&path, old).expect("age the file");

    // A fresh store models a daemon restart: the disk content is the reference.
    let result = save_state(&path, &settings, &conf, &mut HashStore::new()).expect("second save");
    assert!(matches!(result, WriteResult::Unchanged { .. }));
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).expect("metadata"));
    assert_eq!(mtime, old, "file was rewritten");
}

#[test]
fn changed_leaf_is_written_and_reloads() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("state.yml");
    let settings = settings();
    let mut conf = settings.defaults();
    let mut store = HashStore::new();

    save_state(&path, &settings, &conf, &mut store).expect("first save");
    conf.set("controllers.gyro_scaling", 90).expect("set");
    let result = save_state(&path, &settings, &conf, &mut store).expect("second save");
    assert!(result.written());

    let loaded = load_state(&path, &settings).expect("load").expect("present");
    assert_eq!(loaded, conf);
}

// ---------------------------------------------------------------------------
// 3. Profile directory
// ---------------------------------------------------------------------------

#[test]
fn profile_store_survives_save_and_rescan() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings();
    let mut store = ProfileStore::new(tmp.path().join("profiles"));
    store
        .upsert("racer", conf_from("controllers: { gyro_scaling: 80 }"), &settings)
        .expect("upsert racer");
    store
        .upsert("_handheld", conf_from("controllers: { deadzone: 0.2 }"), &settings)
        .expect("upsert template");

    let mut hashes = HashStore::new();
    for result in store.save_all(&settings, &mut hashes) {
        result.expect("save");
    }

    let mut fresh = ProfileStore::new(tmp.path().join("profiles"));
    let names = fresh.rescan(&settings).expect("rescan");
    assert_eq!(names, vec!["racer".to_string()]);
    assert_eq!(
        fresh.get("racer").expect("racer").to::<i64>("controllers.gyro_scaling").expect("leaf"),
        80
    );
    assert!(fresh.template("_handheld").is_some());
    assert!(fresh.template("_template").is_some(), "default template always written");
}
