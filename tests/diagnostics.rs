//! Integration tests for edition health reports and remediation.

mod common;

use chrono::Duration;
use common::{Fixture, StubRasterizer};
use edition_render::{Diagnostics, EditionError, EditionStatus, Issue};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn processed_edition_is_healthy() {
    let fx = Fixture::new();
    let edition = fx.draft("Fine").await;
    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(2)));
    assert_ok!(diagnostics.reprocess(edition.id).await);

    let report = diagnostics.edition_report(edition.id).await.unwrap();
    assert!(report.is_healthy(), "unexpected issues: {:?}", report.issues);
    assert_eq!(report.pages.len(), 2);
    assert!(report.pages.iter().all(|p| p.resolved.is_some()));
}

#[tokio::test]
async fn deleted_image_is_reported_not_raised() {
    let fx = Fixture::new();
    let edition = fx.draft("Damaged").await;
    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(3)));
    assert_ok!(diagnostics.reprocess(edition.id).await);
    std::fs::remove_file(fx.edition_dir(edition.id).join("page-2.png")).unwrap();

    let report = diagnostics.edition_report(edition.id).await.unwrap();
    assert_eq!(report.issues.len(), 1);
    assert!(matches!(
        &report.issues[0],
        Issue::MissingImage { page: 2, tried } if !tried.is_empty()
    ));
    assert!(report.pages[1].resolved.is_none());
    // Reporting does not change state.
    assert_eq!(fx.edition(edition.id).status, EditionStatus::Ready);
}

#[tokio::test]
async fn directory_in_place_of_image_is_missing() {
    let fx = Fixture::new();
    let edition = fx.draft("Hollowed").await;
    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(2)));
    assert_ok!(diagnostics.reprocess(edition.id).await);
    let image = fx.edition_dir(edition.id).join("page-2.png");
    std::fs::remove_file(&image).unwrap();
    std::fs::create_dir(&image).unwrap();

    let report = diagnostics.edition_report(edition.id).await.unwrap();
    assert!(matches!(report.issues[..], [Issue::MissingImage { page: 2, .. }]));
    assert!(report.pages[1].resolved.is_none());
}

#[tokio::test]
async fn ready_without_pages_is_flagged() {
    let fx = Fixture::new();
    let edition = fx.draft("Hollow").await;
    fx.catalog
        .reset_status(edition.id, EditionStatus::Ready, None)
        .unwrap();

    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(1)));
    let report = diagnostics.edition_report(edition.id).await.unwrap();
    assert_eq!(report.issues, vec![Issue::ReadyWithoutPages]);
}

#[tokio::test]
async fn reset_releases_a_stuck_edition() {
    let fx = Fixture::new();
    let edition = fx.draft("Stuck").await;
    assert!(fx.catalog.try_claim(edition.id).unwrap().is_some());

    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(2)))
        .with_stuck_after(Duration::seconds(-1));
    let report = diagnostics.edition_report(edition.id).await.unwrap();
    assert!(matches!(report.issues[..], [Issue::StuckProcessing { .. }]));

    // A stuck edition cannot be reprocessed until reset.
    let err = assert_err!(diagnostics.reprocess(edition.id).await);
    assert!(matches!(err, EditionError::AlreadyProcessing { .. }));

    let reset = assert_ok!(diagnostics.reset(edition.id, EditionStatus::Failed).await);
    assert_eq!(reset.status, EditionStatus::Failed);
    assert_eq!(reset.failure_reason.as_deref(), Some("reset by administrator"));

    assert_ok!(diagnostics.reprocess(edition.id).await);
    assert_eq!(fx.edition(edition.id).status, EditionStatus::Ready);
}

#[tokio::test]
async fn reset_rejects_non_resting_targets() {
    let fx = Fixture::new();
    let edition = fx.draft("Nope").await;
    let diagnostics = Diagnostics::new(fx.processor(StubRasterizer::new(1)));

    let err = assert_err!(diagnostics.reset(edition.id, EditionStatus::Ready).await);
    assert!(matches!(err, EditionError::InvalidConfig(_)));
    let err = assert_err!(diagnostics.reset(999, EditionStatus::Draft).await);
    assert!(matches!(err, EditionError::EditionNotFound { id: 999 }));
    assert_eq!(fx.edition(edition.id).status, EditionStatus::Draft);
}

#[tokio::test]
async fn repair_all_reprocesses_failed_and_skips_stuck() {
    let fx = Fixture::new();
    let rasterizer = StubRasterizer::new(0);
    let diagnostics = Diagnostics::new(fx.processor(rasterizer.clone()))
        .with_stuck_after(Duration::seconds(-1));

    let healthy = fx.draft("Healthy").await;
    let broken = fx.draft("Broken").await;
    let stuck = fx.draft("Stuck").await;

    assert_err!(diagnostics.reprocess(broken.id).await);
    rasterizer.set_pages(2);
    assert_ok!(diagnostics.reprocess(healthy.id).await);
    assert!(fx.catalog.try_claim(stuck.id).unwrap().is_some());

    let summary = assert_ok!(diagnostics.repair_all(2).await);
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.repaired, vec![broken.id]);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.skipped_stuck, vec![stuck.id]);

    assert_eq!(fx.edition(broken.id).status, EditionStatus::Ready);
    assert_eq!(fx.edition(stuck.id).status, EditionStatus::Processing);
}
