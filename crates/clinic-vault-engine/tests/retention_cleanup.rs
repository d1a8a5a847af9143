mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use clinic_vault_core::{
    BackupNaming, Consent, DeliveryError, DestinationKind, HistoryLedger, RetentionError,
    RetentionPolicy, UserFacingError,
};
use clinic_vault_engine::{
    BackupOutcome, BackupWriter, CleanupMode, DirectoryDestination, RetentionRunner,
    VaultServices,
};
use common::{list_files, FixedConsent, FlakyFolder, TestContext};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

/// Three backups on the first day, then one a day for six more days.
const WEEK: [OffsetDateTime; 9] = [
    datetime!(2024-03-01 09:00:00 +09:00),
    datetime!(2024-03-01 14:00:00 +09:00),
    datetime!(2024-03-01 23:00:00 +09:00),
    datetime!(2024-03-02 09:00:00 +09:00),
    datetime!(2024-03-03 09:00:00 +09:00),
    datetime!(2024-03-04 09:00:00 +09:00),
    datetime!(2024-03-05 09:00:00 +09:00),
    datetime!(2024-03-06 09:00:00 +09:00),
    datetime!(2024-03-07 09:00:00 +09:00),
];

fn name(day: u8, hour: u8) -> String {
    format!("clinic_backup_2024-03-{day:02}_{hour:02}-00-00.zip")
}

fn back_up_week(
    ctx: &TestContext,
    writer: &BackupWriter,
    kind: DestinationKind,
) -> anyhow::Result<()> {
    for at in WEEK {
        ctx.clock.set(at);
        if writer.run_manual(kind)? == BackupOutcome::Cancelled {
            anyhow::bail!("backup at {at} was cancelled");
        }
    }
    Ok(())
}

fn runner(services: VaultServices) -> RetentionRunner {
    RetentionRunner::new(services, RetentionPolicy::default(), BackupNaming::default())
}

fn history_names(ctx: &TestContext) -> anyhow::Result<BTreeSet<String>> {
    Ok(ctx
        .ledger
        .load_history()?
        .into_iter()
        .map(|item| item.filename)
        .collect())
}

#[test]
fn directory_cleanup_keeps_latest_per_day_for_five_days() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    let services = ctx.services_with_folder(Consent::Granted);
    back_up_week(&ctx, &ctx.writer(services.clone()), DestinationKind::Directory)?;
    std::fs::write(ctx.backup_dir.join("notes.txt"), b"call supplier")?;
    std::fs::write(ctx.backup_dir.join("clinic_backup_latest.zip"), b"hand copied")?;
    assert_eq!(ctx.folder_files()?.len(), 11);

    let runner = runner(services);
    assert_eq!(runner.mode(), CleanupMode::Directory);
    assert!(!runner.cleanup_due()?);
    let report = runner.run()?;

    assert_eq!(
        report.kept,
        vec![name(7, 9), name(6, 9), name(5, 9), name(4, 9), name(3, 9)]
    );
    let removed: BTreeSet<String> = report.removed.iter().cloned().collect();
    let expected: BTreeSet<String> =
        [name(1, 9), name(1, 14), name(1, 23), name(2, 9)].into_iter().collect();
    assert_eq!(removed, expected);
    assert!(report.failed.is_empty());

    let mut remaining = report.kept.clone();
    remaining.push("clinic_backup_latest.zip".to_string());
    remaining.push("notes.txt".to_string());
    remaining.sort();
    assert_eq!(ctx.folder_files()?, remaining);
    assert_eq!(history_names(&ctx)?, report.kept.iter().cloned().collect());
    Ok(())
}

#[test]
fn second_run_changes_nothing() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    let services = ctx.services_with_folder(Consent::Granted);
    back_up_week(&ctx, &ctx.writer(services.clone()), DestinationKind::Directory)?;

    let runner = runner(services);
    let first = runner.run()?;
    let files_after_first = ctx.folder_files()?;
    let second = runner.run()?;

    assert_eq!(second.kept, first.kept);
    assert!(second.removed.is_empty());
    assert!(second.failed.is_empty());
    assert_eq!(ctx.folder_files()?, files_after_first);
    Ok(())
}

#[test]
fn failed_removal_is_reported_and_others_proceed() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    let services = ctx.services_with_folder(Consent::Granted);
    back_up_week(&ctx, &ctx.writer(services), DestinationKind::Directory)?;

    let flaky = FlakyFolder {
        inner: Arc::new(DirectoryDestination::new(
            &ctx.backup_dir,
            Arc::new(FixedConsent(Consent::Granted)),
        )),
        fail_removal: [name(2, 9)].into_iter().collect(),
    };
    let report = runner(ctx.services().with_directory(Arc::new(flaky))).run()?;

    assert_eq!(report.removed.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, name(2, 9));
    assert!(report.failed[0].reason.contains("permission denied"));

    assert_eq!(ctx.folder_files()?.len(), 6);
    let history = history_names(&ctx)?;
    assert_eq!(history.len(), 6);
    assert!(history.contains(&name(2, 9)));
    assert!(!history.contains(&name(1, 23)));
    Ok(())
}

#[test]
fn ledger_cleanup_prunes_history_but_not_downloads() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    back_up_week(&ctx, &ctx.writer(ctx.services()), DestinationKind::Download)?;

    let runner = runner(ctx.services());
    assert_eq!(runner.mode(), CleanupMode::Ledger);
    let report = runner.run()?;

    assert_eq!(report.mode, CleanupMode::Ledger);
    assert_eq!(report.kept.len(), 5);
    assert_eq!(report.pruned.len(), 4);
    assert!(report.removed.is_empty());
    assert_eq!(history_names(&ctx)?, report.kept.iter().cloned().collect());
    assert_eq!(ctx.download_files()?.len(), 9);

    let newest_first: Vec<OffsetDateTime> = ctx
        .ledger
        .load_history()?
        .into_iter()
        .map(|item| item.created_at)
        .collect();
    assert_eq!(newest_first.first(), WEEK.last());
    Ok(())
}

#[test]
fn folder_cleanup_also_prunes_downloaded_auto_backups() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    let services = ctx.services_with_folder(Consent::Granted);
    let writer = ctx.writer(services.clone());
    for _ in 0..12 {
        if writer.run_auto()? == BackupOutcome::Cancelled {
            anyhow::bail!("auto backup was cancelled");
        }
        ctx.clock.advance(Duration::days(1));
    }
    assert!(ctx.folder_files()?.is_empty());

    let runner = runner(services);
    assert_eq!(runner.mode(), CleanupMode::Directory);
    assert!(runner.cleanup_due()?);
    let report = runner.run()?;

    assert_eq!(report.kept.len(), 5);
    assert_eq!(report.pruned.len(), 7);
    assert!(report.removed.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(history_names(&ctx)?, report.kept.iter().cloned().collect());
    assert!(!runner.cleanup_due()?);
    assert_eq!(ctx.download_files()?.len(), 12);
    Ok(())
}

#[test]
fn cleanup_prompt_follows_history_length() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    back_up_week(&ctx, &ctx.writer(ctx.services()), DestinationKind::Download)?;

    assert!(!runner(ctx.services()).cleanup_due()?);
    assert!(runner(ctx.services()).with_prompt_threshold(9).cleanup_due()?);
    assert!(!runner(ctx.services()).with_prompt_threshold(0).cleanup_due()?);
    Ok(())
}

#[test]
fn refused_folder_access_fails_the_whole_run() -> anyhow::Result<()> {
    let ctx = TestContext::new()?;
    std::fs::create_dir_all(&ctx.backup_dir)?;
    std::fs::write(ctx.backup_dir.join(name(1, 9)), b"old")?;

    let result = runner(ctx.services_with_folder(Consent::Cancelled)).run();
    let Err(err) = result else {
        anyhow::bail!("cleanup ran without folder access");
    };
    assert_eq!(err, RetentionError::Destination(DeliveryError::AccessDenied));
    assert_eq!(UserFacingError::from(&err).code, "CLEANUP_ACCESS_DENIED");
    assert_eq!(list_files(&ctx.backup_dir)?, vec![name(1, 9)]);
    Ok(())
}
