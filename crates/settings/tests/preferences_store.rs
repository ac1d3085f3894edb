use rustcodium_settings::{Preferences, PreferencesStore};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn load_missing_file_returns_defaults() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");

    let store = PreferencesStore::load(&path).expect("load defaults");
    let prefs = store.preferences();
    assert_eq!(prefs.workspace.debounce(), Duration::from_millis(150));
    assert!(prefs.workspace.show_hidden);
    assert!(prefs.workspace.watch);
    assert_eq!(prefs.workspace.ignored_names, vec![".git".to_string()]);
    assert_eq!(prefs.backend.program, None);
    assert_eq!(prefs.backend.port, None, "unset port means pick a free one");
    assert_eq!(prefs.backend.address(8000), "127.0.0.1:8000");
    assert!(!prefs.backend.clear_env);
    assert_eq!(prefs.backend.working_dir, None);
    assert_eq!(prefs.backend.startup_timeout(), Duration::from_secs(30));
    assert_eq!(prefs.backend.shutdown_grace(), Duration::from_secs(5));
    assert_eq!(prefs.logging.filter, "info");
    assert!(!path.exists(), "loading defaults must not create the file");
}

#[test]
fn save_and_reload_roundtrip() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("preferences.json");

    let mut store = PreferencesStore::new(path.clone(), Preferences::default());
    store
        .update(|prefs| {
            prefs.workspace.debounce_ms = 400;
            prefs.workspace.show_hidden = false;
            prefs.backend.program = Some("python3".to_string());
            prefs.backend.args = vec!["-m".to_string(), "http.server".to_string()];
            prefs.backend.env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
            prefs.backend.port = Some(8123);
            prefs.backend.working_dir = Some(temp.path().join("app"));
        })
        .expect("update preferences");

    let reloaded = PreferencesStore::load(&path).expect("reload preferences");
    assert_eq!(reloaded.preferences(), store.preferences());
    assert_eq!(reloaded.preferences().workspace.debounce_ms, 400);
    assert_eq!(
        reloaded.preferences().backend.env.get("PYTHONUNBUFFERED"),
        Some(&"1".to_string())
    );
    assert_eq!(reloaded.preferences().backend.port, Some(8123));
    assert_eq!(
        reloaded.preferences().backend.working_dir.as_deref(),
        Some(temp.path().join("app").as_path())
    );
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn partial_file_is_completed_and_sanitized() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");
    fs::write(
        &path,
        r#"{
            "version": 0,
            "workspace": { "debounce_ms": 0, "ignored_names": ["", "node_modules"] },
            "backend": { "program": "   ", "port": 0, "working_dir": "" },
            "logging": { "filter": "" }
        }"#,
    )
    .expect("write partial prefs");

    let store = PreferencesStore::load(&path).expect("load partial file");
    let prefs = store.preferences();
    assert_eq!(prefs.version, 1, "legacy version should be upgraded");
    assert_eq!(prefs.workspace.debounce_ms, 10, "debounce is clamped to the minimum");
    assert!(prefs.workspace.watch, "missing fields take their defaults");
    assert_eq!(prefs.workspace.ignored_names, vec!["node_modules".to_string()]);
    assert_eq!(prefs.backend.program, None, "blank program means no backend");
    assert_eq!(prefs.backend.port, None, "port 0 means pick a free one");
    assert_eq!(prefs.backend.working_dir, None);
    assert_eq!(prefs.logging.filter, "info");
}

#[test]
fn invalid_json_is_reported_with_path() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");
    fs::write(&path, "{ not json").expect("write broken prefs");

    let err = PreferencesStore::load(&path).expect_err("broken file must fail");
    assert!(err.to_string().contains("preferences.json"));
}
