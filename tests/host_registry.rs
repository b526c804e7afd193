use kensho::errors::ErrorKind;
use kensho::services::logger::Logger;
use kensho::stores::host_registry::HostRegistry;
use std::sync::Arc;

mod common;
use common::tmp_dir;

fn open(path: &std::path::Path) -> HostRegistry {
    HostRegistry::open(Logger::new("test"), path).expect("open registry")
}

#[test]
fn missing_file_opens_empty() {
    let dir = tmp_dir("registry-empty");
    let registry = open(&dir.join("saved_hosts"));
    assert!(registry.is_empty());
    assert!(!dir.join("saved_hosts").exists());
}

#[test]
fn add_is_idempotent_and_persisted() {
    let dir = tmp_dir("registry-idempotent");
    let path = dir.join("saved_hosts");
    let registry = open(&path);

    registry.add("10.0.0.5:22").expect("add");
    registry.add("10.0.0.5:22").expect("add again");
    registry.add("node-b:2222").expect("add second");

    assert_eq!(registry.list(), vec!["10.0.0.5:22", "node-b:2222"]);
    let raw = std::fs::read_to_string(&path).expect("read file");
    assert_eq!(raw, "10.0.0.5:22\nnode-b:2222\n");

    let reopened = open(&path);
    assert_eq!(reopened.list(), registry.list());
}

#[test]
fn delete_missing_host_is_not_found() {
    let dir = tmp_dir("registry-delete");
    let registry = open(&dir.join("saved_hosts"));
    registry.add("a:22").expect("add");

    let err = registry.delete("b:22").expect_err("absent host");
    assert_eq!(err.kind, ErrorKind::NotFound);

    registry.delete("a:22").expect("delete");
    assert!(registry.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.join("saved_hosts")).expect("read"),
        ""
    );
}

#[test]
fn tolerates_blank_lines_and_duplicates_on_load() {
    let dir = tmp_dir("registry-load");
    let path = dir.join("saved_hosts");
    std::fs::write(&path, "a:22\n\n a:22 \nb:22").expect("seed");
    let registry = open(&path);
    assert_eq!(registry.list(), vec!["a:22", "b:22"]);
}

#[test]
fn unreadable_registry_is_registry_io_error() {
    let dir = tmp_dir("registry-unreadable");
    let err = HostRegistry::open(Logger::new("test"), &dir).err().expect("directory");
    assert_eq!(err.kind, ErrorKind::RegistryIo);
}

#[test]
fn failed_write_rolls_back_memory() {
    let dir = tmp_dir("registry-rollback");
    let path = dir.join("saved_hosts");
    let registry = open(&path);
    std::fs::create_dir_all(&path).expect("block the registry path");

    let err = registry.add("a:22").expect_err("write must fail");
    assert_eq!(err.kind, ErrorKind::RegistryIo);
    assert!(!registry.contains("a:22"));
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn rejects_blank_host_ids() {
    let dir = tmp_dir("registry-invalid");
    let registry = open(&dir.join("saved_hosts"));
    assert_eq!(
        registry.add("  ").expect_err("blank").kind,
        ErrorKind::InvalidParams
    );
    assert_eq!(
        registry.add("a:22\nb:22").expect_err("multi-line").kind,
        ErrorKind::InvalidParams
    );
}

#[test]
fn concurrent_adds_converge() {
    let dir = tmp_dir("registry-concurrent");
    let path = dir.join("saved_hosts");
    let registry = Arc::new(open(&path));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    registry.add(&format!("host-{}:22", i)).expect("add shared");
                    registry
                        .add(&format!("worker-{}:{}", worker, 1000 + i))
                        .expect("add own");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    assert_eq!(registry.len(), 10 + 8 * 10);
    let reopened = open(&path);
    assert_eq!(reopened.list(), registry.list());
}
