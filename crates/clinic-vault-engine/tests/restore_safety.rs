mod common;

use std::io::{Cursor, Write};
use std::sync::Arc;

use clinic_vault_core::{
    AssetStore, DestinationKind, ErrorCategory, FormatError, RelationalEngine, RestoreError,
    UserFacingError,
};
use clinic_vault_engine::{
    AssetBundler, BackupOutcome, RestoreExecutor, RestoreMode, RestorePhase, SnapshotCodec,
};
use common::{TestContext, START};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn executor(ctx: &TestContext) -> RestoreExecutor {
    let assets: Arc<dyn AssetStore> = ctx.assets.clone();
    RestoreExecutor::new(ctx.engine.clone(), Some(assets))
}

fn zip_of(entries: &[(&str, &[u8])]) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Raw bytes of the live database file and its write-ahead log.
fn on_disk(ctx: &TestContext) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
    ["clinic.db", "clinic.db-wal"]
        .iter()
        .map(|name| {
            let path = ctx.path().join(name);
            Ok(if path.exists() { Some(std::fs::read(path)?) } else { None })
        })
        .collect()
}

fn seeded() -> anyhow::Result<TestContext> {
    let ctx = TestContext::new()?;
    ctx.add_patient("p1", "Kim", Some("tongue.png"))?;
    ctx.add_patient("p2", "Lee", None)?;
    ctx.add_photo("tongue.png", b"tongue photo")?;
    Ok(ctx)
}

#[test]
fn rejected_restores_leave_live_store_byte_identical() -> anyhow::Result<()> {
    let ctx = seeded()?;
    let image = ctx.engine.export_image()?;
    let bundler = AssetBundler::new();
    let snapshot = SnapshotCodec::validate(image.clone())?;

    let other = SnapshotCodec::validate({
        let mut bytes = image.clone();
        bytes.push(0);
        bytes
    })?;
    let mismatched = bundler.pack(
        &other,
        &[],
        &bundler.manifest_for(&snapshot, 0, START, None)?,
    )?;

    let cases: Vec<(RestoreMode, Vec<u8>, FormatError)> = vec![
        (RestoreMode::Snapshot, Vec::new(), FormatError::Empty),
        (RestoreMode::Snapshot, b"SQLite".to_vec(), FormatError::TooShort { len: 6 }),
        (
            RestoreMode::Snapshot,
            br#"{"patients": [{"id": "p1", "name": "Kim"}]}"#.to_vec(),
            FormatError::SignatureMismatch,
        ),
        (
            RestoreMode::Archive,
            zip_of(&[("assets/tongue.png", b"other photo".as_slice())])?,
            FormatError::MissingSnapshotEntry,
        ),
        (RestoreMode::Archive, mismatched, FormatError::ChecksumMismatch),
    ];

    let executor = executor(&ctx);
    for (mode, bytes, expected) in cases {
        let before = on_disk(&ctx)?;
        let result = executor.restore(mode, &bytes);
        assert_eq!(result, Err(RestoreError::Rejected(expected)));
        assert_eq!(executor.phase(), RestorePhase::Rejected);
        assert_eq!(on_disk(&ctx)?, before);
    }
    assert_eq!(ctx.patient_count()?, 2);
    assert_eq!(ctx.assets.read("tongue.png")?, b"tongue photo".to_vec());
    assert_eq!(ctx.assets.list()?, vec!["tongue.png".to_string()]);
    Ok(())
}

#[test]
fn rejection_maps_to_invalid_file_for_the_user() {
    let err = RestoreError::Rejected(FormatError::MissingSnapshotEntry);
    let shown = UserFacingError::from(&err);
    assert_eq!(shown.category, ErrorCategory::InvalidFile);
    assert_eq!(shown.code, "RESTORE_INVALID_FILE");
}

#[test]
fn archive_restore_brings_back_rows_and_assets() -> anyhow::Result<()> {
    let ctx = seeded()?;
    let writer = ctx.writer(ctx.services());
    let BackupOutcome::Completed(receipt) = writer.run_manual(DestinationKind::Download)? else {
        anyhow::bail!("backup was cancelled");
    };
    let archive = std::fs::read(ctx.downloads.join(&receipt.item.filename))?;

    ctx.add_patient("p3", "Park", None)?;
    ctx.add_photo("tongue.png", b"overwritten")?;
    assert_eq!(ctx.patient_count()?, 3);

    let executor = executor(&ctx);
    let report = executor.restore(RestoreMode::Archive, &archive)?;
    assert_eq!(executor.phase(), RestorePhase::Done);
    assert_eq!(report.assets_restored, 1);
    assert!(report.partial_asset_loss().is_none());
    assert_eq!(report.metadata.map(|m| m.asset_count), Some(1));

    assert_eq!(ctx.patient_count()?, 2);
    assert_eq!(ctx.assets.read("tongue.png")?, b"tongue photo".to_vec());
    assert!(ctx.engine.integrity_check()?.quick_check_ok);
    Ok(())
}

#[test]
fn snapshot_restore_replaces_rows() -> anyhow::Result<()> {
    let ctx = seeded()?;
    let image = ctx.engine.export_image()?;
    ctx.add_patient("p3", "Park", None)?;

    let report = executor(&ctx).restore(RestoreMode::Snapshot, &image)?;
    assert_eq!(report.mode, RestoreMode::Snapshot);
    assert_eq!(report.snapshot_size, image.len());
    assert_eq!(ctx.patient_count()?, 2);
    Ok(())
}

#[test]
fn corrupt_asset_is_reported_as_partial_loss() -> anyhow::Result<()> {
    let ctx = seeded()?;
    let image = ctx.engine.export_image()?;
    let payload = b"PULSE-PHOTO-PAYLOAD-BYTES";
    let mut archive = zip_of(&[
        ("snapshot.db", image.as_slice()),
        ("assets/good.png", b"good".as_slice()),
        ("assets/pulse.jpg", payload.as_slice()),
    ])?;
    let offset = archive
        .windows(payload.len())
        .position(|window| window == payload)
        .ok_or_else(|| anyhow::anyhow!("payload not stored verbatim"))?;
    archive[offset + 3] ^= 0x5A;

    let executor = executor(&ctx);
    let report = executor.restore(RestoreMode::Archive, &archive)?;
    assert_eq!(executor.phase(), RestorePhase::Done);
    assert_eq!(report.assets_restored, 1);
    let loss = report
        .partial_asset_loss()
        .ok_or_else(|| anyhow::anyhow!("expected a partial asset loss"))?;
    assert_eq!(loss.lost, 1);
    assert_eq!(loss.names, vec!["pulse.jpg".to_string()]);
    assert_eq!(ctx.assets.read("good.png")?, b"good".to_vec());
    Ok(())
}

#[test]
fn archive_assets_without_asset_store_are_all_lost() -> anyhow::Result<()> {
    let ctx = seeded()?;
    let image = ctx.engine.export_image()?;
    let archive = zip_of(&[
        ("snapshot.db", image.as_slice()),
        ("assets/a.png", b"a".as_slice()),
        ("assets/b.png", b"b".as_slice()),
    ])?;

    let executor = RestoreExecutor::new(ctx.engine.clone(), None);
    let report = executor.restore(RestoreMode::Archive, &archive)?;
    assert_eq!(report.assets_restored, 0);
    assert_eq!(report.partial_asset_loss().map(|loss| loss.lost), Some(2));
    Ok(())
}
