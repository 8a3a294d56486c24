// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `registry.rs`

use std::str::FromStr;
use std::sync::Arc;

use hickory_proto::rr::Name;

use crate::errors::SyncError;
use crate::registry::{name_to_filename, ZoneRegistry};
use crate::settings::{SettingsSet, Value};

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn registry_in(dir: &std::path::Path) -> ZoneRegistry {
    let local = SettingsSet::local("registry-test", SettingsSet::defaults());
    local
        .set("directory", Value::Str(format!("{}/", dir.display())))
        .unwrap();
    let global = SettingsSet::global("registry-test", local);
    ZoneRegistry::new(global)
}

#[test]
fn test_add_and_exact_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    let info = registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    assert_eq!(info.name, name("example.test."));
    assert!(registry.exact(&name("example.test.")).is_some());
    assert!(registry.exact(&name("other.test.")).is_none());
}

#[test]
fn test_add_rejects_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    let err = registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyExists(_)));
}

#[test]
fn test_child_zones_are_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    registry
        .add(
            &name("sub.example.test."),
            "idnsName=sub.example.test.,cn=dns,dc=x",
        )
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_containing_prefers_deepest_zone() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    registry
        .add(
            &name("sub.example.test."),
            "idnsName=sub.example.test.,cn=dns,dc=x",
        )
        .unwrap();

    let zone = registry.containing(&name("www.sub.example.test.")).unwrap();
    assert_eq!(zone.name, name("sub.example.test."));
    let zone = registry.containing(&name("www.example.test.")).unwrap();
    assert_eq!(zone.name, name("example.test."));
    assert!(registry.containing(&name("www.unrelated.test.")).is_none());
}

#[test]
fn test_delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    registry.delete(&name("example.test."));
    registry.delete(&name("example.test."));
    assert!(registry.is_empty());
}

#[test]
fn test_dn_for_name() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();

    // Apex maps to the zone DN itself.
    assert_eq!(
        registry.dn_for_name(&name("example.test.")).unwrap(),
        "idnsName=example.test.,cn=dns,dc=x"
    );
    // Records gain a relative idnsName RDN.
    assert_eq!(
        registry.dn_for_name(&name("www.example.test.")).unwrap(),
        "idnsName=www, idnsName=example.test.,cn=dns,dc=x"
    );
    assert_eq!(
        registry
            .dn_for_name(&name("a.b.example.test."))
            .unwrap(),
        "idnsName=a.b, idnsName=example.test.,cn=dns,dc=x"
    );
    assert!(matches!(
        registry.dn_for_name(&name("www.unknown.test.")),
        Err(SyncError::NotFound(_))
    ));
}

#[test]
fn test_zone_directories_created_with_keys() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();

    let zone_dir = dir.path().join("master").join("example.test");
    assert!(zone_dir.join("keys").is_dir());

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(zone_dir.join("keys"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[test]
fn test_cleanup_files_removes_only_stale_zones() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    let kept_dir = dir.path().join("master").join("example.test");
    std::fs::write(kept_dir.join("raw"), b"current").unwrap();

    // A leftover from a zone that no longer exists.
    let stale_dir = dir.path().join("master").join("gone.test");
    std::fs::create_dir_all(&stale_dir).unwrap();
    std::fs::write(stale_dir.join("raw.jnl"), b"stale").unwrap();

    registry.cleanup_files().unwrap();
    assert!(!stale_dir.exists());
    assert!(kept_dir.join("raw").exists());
}

#[test]
fn test_name_to_filename() {
    assert_eq!(name_to_filename(&Name::root()), "@");
    assert_eq!(name_to_filename(&name("test.")), "test");
    // Letters are downcased, odd octets are percent-encoded.
    let mixed = Name::from_labels([&b"TEST"[..], &b"0/1"[..], &b"a"[..]]).unwrap();
    assert_eq!(name_to_filename(&mixed), "test.0%2F1.a");
}

#[test]
fn test_zone_paths() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());

    let file = registry.zone_file_path(&name("example.test.")).unwrap();
    assert!(file.ends_with("master/example.test/raw"));
    let journal = registry.journal_path(&name("example.test.")).unwrap();
    assert!(journal.ends_with("master/example.test/raw.jnl"));
}

#[test]
fn test_shared_arc_settings_visible_through_registry() {
    // Zone settings resolve through global to local defaults.
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path());
    let info = registry
        .add(&name("example.test."), "idnsName=example.test.,cn=dns,dc=x")
        .unwrap();
    assert!(!info.settings.get_bool("sync_ptr").unwrap());
    info.settings
        .set("sync_ptr", Value::Bool(true))
        .unwrap();
    let again = Arc::clone(&registry.exact(&name("example.test.")).unwrap());
    assert!(again.settings.get_bool("sync_ptr").unwrap());
}
