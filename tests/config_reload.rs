//! Hot reload through the file watcher.

mod common;

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{buffer_logger, eventually, write_config, yaml_config};
use service_runtime::config::LogLevel;
use service_runtime::{ConfigStore, ConfigWatcher};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn file_change_is_picked_up() {
    let (_dir, path) = write_config(&yaml_config(8080, ""));
    let store = ConfigStore::open(&path).unwrap();
    let (logger, sink) = buffer_logger(LogLevel::Info);

    let handle = ConfigWatcher::new(&path, store.clone(), logger)
        .spawn()
        .unwrap();
    assert!(handle.is_running());
    assert_eq!(store.load().server.port, 8080);

    fs::write(&path, yaml_config(9090, "")).unwrap();

    let reloaded = eventually(WAIT, || {
        let store = store.clone();
        async move { store.load().server.port == 9090 }
    })
    .await;
    assert!(reloaded, "store never observed the new port");
    assert!(store.generation() >= 1);
    assert!(sink.contents().contains("config reloaded"));
}

#[tokio::test]
async fn in_place_save_does_not_log_a_failed_reload() {
    let (_dir, path) = write_config(&yaml_config(8080, ""));
    let store = ConfigStore::open(&path).unwrap();
    let (logger, sink) = buffer_logger(LogLevel::Info);

    let _handle = ConfigWatcher::new(&path, store.clone(), logger)
        .spawn()
        .unwrap();

    // Truncate and write are separate events for one save.
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    file.write_all(yaml_config(9191, "").as_bytes()).unwrap();
    drop(file);

    let reloaded = eventually(WAIT, || {
        let store = store.clone();
        async move { store.load().server.port == 9191 }
    })
    .await;
    assert!(reloaded);
    assert!(!sink.contents().contains("config reload failed"), "{}", sink.contents());
}

#[tokio::test]
async fn malformed_change_keeps_serving_old_snapshot() {
    let (_dir, path) = write_config(&yaml_config(8080, ""));
    let store = ConfigStore::open(&path).unwrap();
    let (logger, sink) = buffer_logger(LogLevel::Info);
    let before = store.load();

    let _handle = ConfigWatcher::new(&path, store.clone(), logger)
        .spawn()
        .unwrap();

    fs::write(&path, "app: [unterminated\n").unwrap();

    let failed = eventually(WAIT, || {
        let sink = sink.clone();
        async move { sink.contents().contains("config reload failed") }
    })
    .await;
    assert!(failed, "reload failure was never logged");

    assert!(Arc::ptr_eq(&before, &store.load()));
    assert_eq!(store.generation(), 0);

    // A later good write still goes through.
    fs::write(&path, yaml_config(7070, "")).unwrap();
    let recovered = eventually(WAIT, || {
        let store = store.clone();
        async move { store.load().server.port == 7070 }
    })
    .await;
    assert!(recovered);
}

#[tokio::test]
async fn dropping_handle_stops_reloading() {
    let (_dir, path) = write_config(&yaml_config(8080, ""));
    let store = ConfigStore::open(&path).unwrap();
    let (logger, _sink) = buffer_logger(LogLevel::Info);

    let handle = ConfigWatcher::new(&path, store.clone(), logger)
        .spawn()
        .unwrap();
    drop(handle);
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(&path, yaml_config(9090, "")).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(store.load().server.port, 8080);
}
