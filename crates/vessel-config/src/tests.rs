//! Unit tests for configuration loading and validation.

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn args(extra: &[&str]) -> Vec<OsString> {
    std::iter::once("vessel")
        .chain(extra.iter().copied())
        .map(OsString::from)
        .collect()
}

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("vessel.toml");
    fs::write(&path, body).expect("write config fixture");
    path.to_str().expect("temp path is UTF-8").to_owned()
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.log_filter(), "info");
    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.sysfs(), SysfsMode::ReadOnly);
    assert!(config.bwrap().is_none());
    assert_eq!(config.terminate_wait(), Duration::from_secs(2));
    assert_eq!(config.terminate_kill(), Duration::from_secs(1));
    assert_eq!(config.symlink_limit(), 40);
}

#[test]
fn file_values_replace_defaults_and_missing_fields_keep_them() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "sysfs = \"read-write\"\nterminate_wait_ms = 500\n");

    let config = Config::load_from_args(args(&["--config-path", &path])).expect("load config");

    assert_eq!(config.sysfs(), SysfsMode::ReadWrite);
    assert_eq!(config.terminate_wait(), Duration::from_millis(500));
    assert_eq!(config.terminate_kill(), DEFAULT_TERMINATE_KILL);
}

#[test]
fn flags_take_precedence_over_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "symlink_limit = 8\nlog_format = \"json\"\n");

    let config = Config::load_from_args(args(&[
        "--config-path",
        &path,
        "--symlink-limit",
        "12",
        "--log-format=compact",
    ]))
    .expect("load config");

    assert_eq!(config.symlink_limit(), 12);
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[test]
fn malformed_file_is_a_load_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "symlink_limit = = 3\n");

    let error = Config::load_from_args(args(&["--config-path", &path]))
        .expect_err("malformed file must fail");
    assert!(matches!(error, ConfigError::Load(_)), "got {error}");
}

#[rstest]
#[case::relative_bwrap(&["--bwrap", "bwrap"], "bwrap")]
#[case::blank_filter(&["--log-filter", "  "], "log_filter")]
#[case::zero_symlink_limit(&["--symlink-limit=0"], "symlink_limit")]
fn unusable_values_are_rejected(#[case] flags: &[&str], #[case] field: &str) {
    let error = Config::load_from_args(args(flags)).expect_err("value must be rejected");
    match error {
        ConfigError::Invalid { field: actual, .. } => assert_eq!(actual, field),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn absolute_bwrap_is_accepted() {
    let config =
        Config::load_from_args(args(&["--bwrap", "/opt/bwrap/bin/bwrap"])).expect("load config");
    assert_eq!(config.bwrap(), Some(Utf8Path::new("/opt/bwrap/bin/bwrap")));
}

#[rstest]
#[case("json", LogFormat::Json, true)]
#[case("COMPACT", LogFormat::Compact, false)]
fn log_format_parses_case_insensitively(
    #[case] input: &str,
    #[case] expected: LogFormat,
    #[case] structured: bool,
) {
    let format = LogFormat::from_str(input).expect("parse");
    assert_eq!(format, expected);
    assert_eq!(format.is_structured(), structured);
    assert_eq!(format.allows_colour(), !structured);
}

#[rstest]
#[case("read-only", SysfsMode::ReadOnly, false)]
#[case("Read-Write", SysfsMode::ReadWrite, true)]
fn sysfs_mode_parses_and_reports_writability(
    #[case] input: &str,
    #[case] expected: SysfsMode,
    #[case] writable: bool,
) {
    let mode = SysfsMode::from_str(input).expect("parse");
    assert_eq!(mode, expected);
    assert_eq!(mode.is_writable(), writable);
}
