use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use action_flow::{CaptureLevel, CaptureRequest, DiagnosticCapture, DiagnosticError};
use async_trait::async_trait;
use serial_test::serial;
use stepwise_cli::cli::{
    cmd_check, cmd_logs, cmd_report, cmd_sweep, CheckArgs, LogsArgs, LogsView, OutputFormat,
    ReportArgs, SweepArgs,
};
use stepwise_cli::{load_config, AppConfig, RunServices, ScreenshotCapture, ScreenshotSource};
use stepwise_event_store::{EventSink, FileEventSink, LogRecord, Severity};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn config_at(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.retention.root = root.to_path_buf();
    config
}

fn write_errors(root: &Path, n: usize) {
    let sink = FileEventSink::new(root);
    for i in 0..n {
        let record = LogRecord::new("errors", Severity::Error, format!("step failed #{i}"))
            .with_field("step", "export");
        sink.append(&record).unwrap();
    }
    sink.flush().unwrap();
}

#[test]
fn sweep_compresses_then_purges_aged_logs() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path(), 10);
    let services = RunServices::new(config_at(dir.path())).unwrap();
    let lifecycle = services.lifecycle();

    let fresh = lifecycle.sweep();
    assert_eq!(fresh.compressed, 0);

    let report = lifecycle.sweep_at(SystemTime::now() + 2 * DAY);
    assert_eq!(report.compressed, 1);
    assert!(report.errors.is_empty());
    let inventory = lifecycle.inventory().unwrap();
    let errors = &inventory.categories["errors"];
    assert_eq!(errors.raw_files, 0);
    assert_eq!(errors.compressed_files, 1);

    let report = lifecycle.sweep_at(SystemTime::now() + 8 * DAY);
    assert_eq!(report.purged, 1);
    assert_eq!(lifecycle.inventory().unwrap().total_files(), 0);
}

#[test]
fn report_command_counts_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path(), 3);
    let shots = dir.path().join("screenshots").join("2024-03-09");
    fs::create_dir_all(&shots).unwrap();
    fs::write(shots.join("error_save_attempt1_101500.png"), b"png").unwrap();
    fs::write(shots.join("success_save_attempt2_101503.png"), b"png").unwrap();

    let config = config_at(dir.path());
    let report = cmd_report(&ReportArgs::default(), &config, OutputFormat::Json).unwrap();
    assert_eq!(report.artifacts.categories["errors"].raw_files, 1);
    assert_eq!(report.screenshots.error, 1);
    assert_eq!(report.screenshots.success, 1);
    assert!(report.resolver.is_none());

    let only_errors = ReportArgs {
        root: None,
        category: Some("errors".into()),
    };
    let report = cmd_report(&only_errors, &config, OutputFormat::Human).unwrap();
    assert_eq!(report.artifacts.categories.len(), 1);
}

#[test]
fn sweep_command_honours_root_override() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path(), 1);
    let args = SweepArgs {
        root: Some(dir.path().to_path_buf()),
    };
    let report = cmd_sweep(&args, &AppConfig::default(), OutputFormat::Yaml).unwrap();
    assert!(report.is_noop());
    assert_eq!(
        fs::read_dir(dir.path().join("errors")).unwrap().count(),
        1
    );
}

#[test]
fn logs_command_reads_through_compression() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path(), 5);
    let config = config_at(dir.path());

    let tailed = LogsArgs {
        tail: Some(2),
        ..LogsArgs::default()
    };
    let LogsView::Log {
        date,
        compressed,
        total_lines,
        lines,
        ..
    } = cmd_logs(&tailed, &config, OutputFormat::Human).unwrap()
    else {
        panic!("expected today's errors log");
    };
    assert!(!compressed);
    assert_eq!(total_lines, 5);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("step failed #4"));
    assert!(lines[1].contains("ctx.step=export"));

    let services = RunServices::new(config.clone()).unwrap();
    let report = services.lifecycle().sweep_at(SystemTime::now() + 2 * DAY);
    assert_eq!(report.compressed, 1);

    let by_date = LogsArgs {
        category: Some("errors".into()),
        date: Some(date),
        ..LogsArgs::default()
    };
    let LogsView::Log {
        compressed,
        lines,
        path,
        ..
    } = cmd_logs(&by_date, &config, OutputFormat::Json).unwrap()
    else {
        panic!("expected the compressed errors log");
    };
    assert!(compressed);
    assert!(path.to_string_lossy().ends_with(".zst"));
    assert_eq!(lines.len(), 5);
    assert!(lines[0].contains("step failed #0"));

    let listed = LogsArgs {
        list: true,
        root: Some(dir.path().to_path_buf()),
        ..LogsArgs::default()
    };
    let LogsView::Listing { categories, .. } =
        cmd_logs(&listed, &AppConfig::default(), OutputFormat::Yaml).unwrap()
    else {
        panic!("expected a listing");
    };
    assert_eq!(categories.len(), 1);
    assert_eq!(categories["errors"], vec![date]);

    let missing = LogsArgs {
        category: Some("performance".into()),
        ..LogsArgs::default()
    };
    assert!(matches!(
        cmd_logs(&missing, &config, OutputFormat::Human).unwrap(),
        LogsView::Missing { .. }
    ));
}

#[test]
fn check_command_validates_plans_and_catalogs() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.yaml");
    fs::write(
        &plan,
        r#"
name: daily-export
deadline_ms: 600000
steps:
  - id: login
    executor: portal.login
    critical: true
  - id: export
    executor: portal.export_orders
    retry:
      max_attempts: 5
"#,
    )
    .unwrap();
    let catalog = dir.path().join("targets.yaml");
    fs::write(
        &catalog,
        "submit_order:\n  - css=button[type=submit]\n  - text=Place order\n",
    )
    .unwrap();

    let args = CheckArgs {
        plans: vec![plan.clone()],
        catalogs: vec![catalog.clone()],
    };
    let summary = cmd_check(&args, &AppConfig::default(), None, OutputFormat::Human).unwrap();
    assert_eq!(summary.plans[0].entries, 2);
    assert_eq!(summary.catalogs[0].entries, 1);

    fs::write(&plan, "name: empty\nsteps: []\n").unwrap();
    let err = cmd_check(&args, &AppConfig::default(), None, OutputFormat::Human).unwrap_err();
    assert!(format!("{err:#}").contains("has no steps"));
}

#[test]
#[serial]
fn environment_overrides_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stepwise.yaml");
    fs::write(
        &path,
        "locator:\n  max_failure_streak: 5\nretention:\n  min_age_ms: 1000\n",
    )
    .unwrap();

    std::env::set_var("STEPWISE__RETENTION__MIN_AGE_MS", "120000");
    std::env::set_var("STEPWISE__LOGGING__LEVEL", "debug");
    let loaded = load_config(Some(&path));
    std::env::remove_var("STEPWISE__RETENTION__MIN_AGE_MS");
    std::env::remove_var("STEPWISE__LOGGING__LEVEL");

    let loaded = loaded.unwrap();
    assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
    assert_eq!(loaded.config.locator.max_failure_streak, 5);
    assert_eq!(loaded.config.retention.min_age_ms, 120_000);
    assert_eq!(loaded.config.logging.level, "debug");
}

#[test]
#[serial]
fn invalid_environment_values_are_rejected() {
    std::env::set_var("STEPWISE__TIMEOUTS__PERCENTILE", "1.5");
    let result = load_config(None);
    std::env::remove_var("STEPWISE__TIMEOUTS__PERCENTILE");
    assert!(result.is_err());
}

#[test]
fn services_persist_failure_records_under_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let services = RunServices::new(config_at(dir.path())).unwrap();
    services
        .sink()
        .append(&LogRecord::new("errors", Severity::Error, "boom"))
        .unwrap();
    assert!(!services.finish());
    let inventory = services.lifecycle().inventory().unwrap();
    assert_eq!(inventory.categories["errors"].raw_files, 1);
}

struct BlankPng;

#[async_trait]
impl ScreenshotSource for BlankPng {
    async fn screenshot(&self) -> Result<Vec<u8>, DiagnosticError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

#[test]
fn screenshots_land_where_the_sweep_and_report_look() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_at(dir.path());
    let capture = ScreenshotCapture::new(Arc::new(BlankPng), config.retention.screenshots_dir());
    let request = CaptureRequest {
        run_id: "run-1".into(),
        step_id: "export".into(),
        label: "Export orders".into(),
        attempt: 1,
        level: CaptureLevel::Error,
        error: Some("download button missing".into()),
    };
    let artifact = tokio_test::block_on(capture.capture(&request)).unwrap();
    assert!(artifact.path.starts_with(dir.path().join("screenshots")));

    let services = RunServices::new(config).unwrap();
    let report = services.maintenance_report().unwrap();
    assert_eq!(report.screenshots.error, 1);
    assert_eq!(report.artifacts.categories["screenshots"].raw_files, 1);

    let swept = services.lifecycle().sweep_at(SystemTime::now() + 2 * DAY);
    assert_eq!(swept.compressed, 1);
    assert_eq!(services.maintenance_report().unwrap().screenshots.error, 1);
}
