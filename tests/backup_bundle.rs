#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn bundle_export_and_import_roundtrip_with_checksum() {
    let workspace = temp_dir("absensi-backup-src");
    let workspace2 = temp_dir("absensi-backup-dst");
    let out_dir = temp_dir("absensi-backup-out");

    let db_src = workspace.join("absensi.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.absensi-backup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/absensi.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("absensi.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

fn write_bundle(path: &PathBuf, manifest: &str, db_bytes: &[u8]) {
    let out = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(out);
    let opts = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.as_bytes()).expect("write manifest");
    zip.start_file("db/absensi.sqlite3", opts).expect("db entry");
    zip.write_all(db_bytes).expect("write db");
    zip.finish().expect("finish zip");
}

#[test]
fn import_refuses_a_bundle_with_a_wrong_checksum() {
    let out_dir = temp_dir("absensi-backup-tamper");
    let workspace = temp_dir("absensi-backup-tamper-dst");

    let bundle_path = out_dir.join("tampered.zip");
    let manifest = format!(
        r#"{{"format":"{}","version":1,"dbSha256":"{}"}}"#,
        backup::BUNDLE_FORMAT_V1,
        "0".repeat(64)
    );
    write_bundle(&bundle_path, &manifest, b"tampered-db-bytes");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("tampered bundle must be refused");
    assert!(
        err.to_string().contains("checksum mismatch"),
        "unexpected error: {}",
        err
    );
    assert!(
        !workspace.join("absensi.sqlite3").exists(),
        "refused import must not leave a database behind"
    );

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn import_refuses_unknown_formats_and_missing_manifests() {
    let out_dir = temp_dir("absensi-backup-format");
    let workspace = temp_dir("absensi-backup-format-dst");

    let bundle_path = out_dir.join("foreign.zip");
    write_bundle(
        &bundle_path,
        r#"{"format":"some-other-app-v2","version":2}"#,
        b"whatever",
    );
    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("foreign bundle must be refused");
    assert!(err.to_string().contains("unsupported bundle format"));

    let not_zip = out_dir.join("not-a-bundle.bin");
    std::fs::write(&not_zip, b"plain bytes").expect("write file");
    assert!(backup::import_workspace_bundle(&not_zip, &workspace).is_err());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_fails_without_a_workspace_database() {
    let workspace = temp_dir("absensi-backup-empty");
    let out_dir = temp_dir("absensi-backup-empty-out");
    let bundle_path = out_dir.join("missing.zip");

    assert!(backup::export_workspace_bundle(&workspace, &bundle_path).is_err());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
