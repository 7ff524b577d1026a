//! Unit tests for the `/usr` bind plan.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn rendered(plan: &MountPlan) -> Vec<String> {
    plan.describe()
        .into_iter()
        .map(|arg: OsString| arg.to_string_lossy().into_owned())
        .collect()
}

/// `usr/{bin,lib}`, `bin -> usr/bin`, real `lib64` and `sbin`, plus
/// `libexec`, `etc` and `.ref`.
#[fixture]
fn split_provider() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path();
    for sub in ["usr/bin", "usr/lib", "lib64", "sbin", "libexec", "etc"] {
        fs::create_dir_all(root.join(sub)).expect("mkdir");
    }
    symlink("usr/bin", root.join("bin")).expect("link bin");
    fs::write(root.join(".ref"), "").expect("write .ref");
    dir
}

/// A merged `/usr` with no `usr` below it.
#[fixture]
fn merged_provider() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    for sub in ["bin", "lib", "lib32", "libexec", "share"] {
        fs::create_dir_all(dir.path().join(sub)).expect("mkdir");
    }
    dir
}

#[rstest]
#[case("lib", true)]
#[case("lib64", true)]
#[case("libx32", true)]
#[case("libexec", false)]
#[case("bin", true)]
#[case("sbin", true)]
#[case(".ref", true)]
#[case("etc", false)]
#[case("usr", false)]
#[case("binaries", false)]
fn companion_names(#[case] name: &str, #[case] expected: bool) {
    assert_eq!(is_usr_companion(OsStr::new(name)), expected);
}

#[rstest]
fn split_layout_binds_usr_then_handles_each_companion(split_provider: TempDir) {
    let host = PathBuf::from("/host/provider");
    let plan = bind_usr(&host, split_provider.path(), Path::new("/run/host"))
        .expect("plan split provider");

    assert_eq!(
        rendered(&plan),
        [
            "--ro-bind", "/host/provider/usr", "/run/host/usr",
            "--ro-bind", "/host/provider/.ref", "/run/host/.ref",
            "--symlink", "usr/bin", "/run/host/bin",
            "--ro-bind", "/host/provider/lib64", "/run/host/lib64",
            "--ro-bind", "/host/provider/sbin", "/run/host/sbin",
        ]
    );
    plan.validate_order().expect("plan is ordered");
}

#[rstest]
fn merged_layout_links_every_companion_into_usr(merged_provider: TempDir) {
    let host = PathBuf::from("/host/merged");
    let plan = bind_usr(&host, merged_provider.path(), Path::new("/run/host"))
        .expect("plan merged provider");

    assert_eq!(
        rendered(&plan),
        [
            "--ro-bind", "/host/merged", "/run/host/usr",
            "--symlink", "usr/bin", "/run/host/bin",
            "--symlink", "usr/lib", "/run/host/lib",
            "--symlink", "usr/lib32", "/run/host/lib32",
        ]
    );
}

#[rstest]
fn real_directory_is_never_turned_into_a_symlink(split_provider: TempDir) {
    let plan = bind_usr(split_provider.path(), split_provider.path(), Path::new("/run/host"))
        .expect("plan split provider");
    let sbin: Vec<_> = plan
        .entries()
        .iter()
        .filter(|entry| entry.destination() == Path::new("/run/host/sbin"))
        .collect();
    assert_eq!(sbin.len(), 1);
    assert!(matches!(sbin.first(), Some(MountPlanEntry::BindReadOnly { .. })));
}

#[rstest]
fn layout_detection(split_provider: TempDir, merged_provider: TempDir) {
    assert_eq!(
        detect_layout(split_provider.path()).expect("detect split"),
        UsrLayout::Split
    );
    assert_eq!(
        detect_layout(merged_provider.path()).expect("detect merged"),
        UsrLayout::Merged
    );
}

#[test]
fn missing_provider_is_an_error() {
    let error = bind_usr(
        Path::new("/nonexistent"),
        Path::new("/nonexistent/provider"),
        Path::new("/run/host"),
    )
    .expect_err("missing provider");
    assert!(matches!(error, PlanError::Resolve(ref inner) if inner.is_not_found()));
}
