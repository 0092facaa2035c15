//! Runs the subprocess rasterizer against `/bin/sh` scripts standing in for
//! pdftoppm.

#![cfg(unix)]

mod common;

use common::Fixture;
use edition_render::{
    EditionError, EditionProcessor, EditionStatus, ExternalRasterizer, PipelineConfig,
    RasterRequest, Rasterizer, RasterizeReason,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_test::{assert_err, assert_ok};

/// Config whose "rasterizer" is `sh -c <script> rasterize <input> <prefix>`.
fn shell_config(fx: &Fixture, script: &str, timeout_secs: u64) -> PipelineConfig {
    PipelineConfig::builder()
        .root_dir(fx.root.path())
        .rasterizer_path("/bin/sh")
        .rasterizer_args(["-c", script, "rasterize", "{input}", "{output_prefix}"])
        .timeout_secs(timeout_secs)
        .build()
        .unwrap()
}

fn external(fx: &Fixture, config: PipelineConfig) -> EditionProcessor {
    EditionProcessor::with_external_rasterizer(config, Arc::clone(&fx.catalog)).unwrap()
}

#[tokio::test]
async fn pages_written_by_the_tool_are_published() {
    let fx = Fixture::new();
    let edition = fx.draft("Shell").await;
    let script = r#"test -f "$1" || exit 9; for n in 3 1 2; do printf png > "$2-$n.png"; done"#;
    let processor = external(&fx, shell_config(&fx, script, 10));

    let outcome = assert_ok!(processor.process(edition.id).await);
    assert_eq!(outcome.total_pages, 3);

    let edition = fx.edition(edition.id);
    assert_eq!(edition.status, EditionStatus::Ready);
    let dir = fx.edition_dir(edition.id);
    for n in 1..=3 {
        assert!(dir.join(format!("page-{n}.png")).is_file());
    }
}

#[tokio::test]
async fn nonzero_exit_is_reported_with_its_code() {
    let fx = Fixture::new();
    let edition = fx.draft("Broken tool").await;
    let script = r#"printf png > "$2-1.png"; echo "Syntax Error" >&2; exit 3"#;
    let processor = external(&fx, shell_config(&fx, script, 10));

    let err = assert_err!(processor.process(edition.id).await);
    assert!(matches!(
        err,
        EditionError::RasterizeFailure {
            reason: RasterizeReason::ExitCode(3)
        }
    ));

    let edition = fx.edition(edition.id);
    assert_eq!(edition.status, EditionStatus::Failed);
    assert_eq!(edition.failure_reason.as_deref(), Some("exit code 3"));
    assert_eq!(fx.catalog.page_count(edition.id).unwrap(), 0);
}

#[tokio::test]
async fn silent_success_without_images_is_no_output() {
    let fx = Fixture::new();
    let edition = fx.draft("Quiet tool").await;
    let processor = external(&fx, shell_config(&fx, "exit 0", 10));

    let err = assert_err!(processor.process(edition.id).await);
    assert!(matches!(
        err,
        EditionError::RasterizeFailure {
            reason: RasterizeReason::NoOutput
        }
    ));
    assert_eq!(fx.edition(edition.id).status, EditionStatus::Failed);
}

#[tokio::test]
async fn hung_tool_is_killed_at_the_deadline() {
    let fx = Fixture::new();
    let edition = fx.draft("Hung tool").await;
    let processor = external(&fx, shell_config(&fx, "exec sleep 30", 1));

    let start = Instant::now();
    let err = assert_err!(processor.process(edition.id).await);
    assert!(start.elapsed().as_secs() < 10);
    assert!(matches!(
        err,
        EditionError::RasterizeFailure {
            reason: RasterizeReason::Timeout { secs: 1 }
        }
    ));

    let edition = fx.edition(edition.id);
    assert_eq!(edition.status, EditionStatus::Failed);
    assert_eq!(edition.failure_reason.as_deref(), Some("timeout after 1s"));
}

#[tokio::test]
async fn missing_executable_is_unavailable() {
    let fx = Fixture::new();
    let config = PipelineConfig::builder()
        .root_dir(fx.root.path())
        .rasterizer_path(fx.root.path().join("no-such-pdftoppm"))
        .build();
    assert!(matches!(
        config,
        Err(EditionError::RasterizerUnavailable { .. })
    ));
}

#[tokio::test]
async fn page_hint_argument_is_passed_only_when_known() {
    let fx = Fixture::new();
    let config = PipelineConfig::builder()
        .root_dir(fx.root.path())
        .rasterizer_path("/bin/sh")
        .rasterizer_args(["-c", "exit 0", "rasterize", "{input}", "-l", "{page_hint}"])
        .build()
        .unwrap();
    let rasterizer = assert_ok!(ExternalRasterizer::from_config(&config));

    let input = fx.root.path().join("in.pdf");
    let mut request = RasterRequest {
        source: &input,
        output_dir: fx.root.path(),
        page_hint: None,
    };
    assert_eq!(rasterizer.command_args(&request).len(), 5);
    request.page_hint = Some(12);
    assert_eq!(rasterizer.command_args(&request).last().map(String::as_str), Some("12"));
    assert_eq!(rasterizer.name(), "sh");
}
