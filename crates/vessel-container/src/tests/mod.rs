//! Crate-level integration and BDD tests.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use tempfile::TempDir;
use vessel_config::SysfsMode;

use crate::{Launcher, MountPlan, Sysroot, api_filesystems, bind_usr, copy_tree};


fn rendered(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn runtime_with_symlinked_bin_yields_usr_bind_then_link() {
    let dir = TempDir::new().expect("temp dir");
    let runtime = dir.path().join("opt/runtime");
    fs::create_dir_all(runtime.join("usr/bin")).expect("mkdir usr/bin");
    fs::create_dir_all(runtime.join("usr/lib")).expect("mkdir usr/lib");
    symlink("usr/bin", runtime.join("bin")).expect("link bin");

    let plan = bind_usr(&runtime, &runtime, Path::new("/run/host")).expect("bind usr");

    let usr = runtime.join("usr");
    assert_eq!(
        rendered(&plan.describe()),
        [
            "--ro-bind",
            usr.to_str().expect("utf-8 temp path"),
            "/run/host/usr",
            "--symlink",
            "usr/bin",
            "/run/host/bin",
        ]
    );
}

#[test]
fn full_plan_combines_api_filesystems_provider_and_overlay() {
    let host_dir = TempDir::new().expect("temp dir");
    fs::create_dir_all(host_dir.path().join("dev")).expect("mkdir dev");
    let provider = TempDir::new().expect("temp dir");
    fs::create_dir_all(provider.path().join("bin")).expect("mkdir bin");
    let stage = TempDir::new().expect("temp dir");
    let overlay = stage.path().join("etc/vessel");
    fs::create_dir_all(&overlay).expect("mkdir overlay");
    fs::write(overlay.join("release"), "1\n").expect("write overlay file");

    let host = Sysroot::open(host_dir.path()).expect("open host");
    let mut plan = MountPlan::new();
    plan.extend(api_filesystems(&host, SysfsMode::ReadOnly));
    plan.extend(bind_usr(provider.path(), provider.path(), Path::new("/run/host")).expect("bind"));
    plan.extend(copy_tree(&overlay, Path::new("/etc/vessel")).expect("copy tree"));
    plan.validate_order().expect("combined plan is ordered");

    let argv = Launcher::new("/usr/bin/bwrap").command_line(plan, &[OsString::from("true")]);
    assert_eq!(argv.fds().len(), 1);
    argv.prepare_inheritance().expect("make descriptors inheritable");
    let rendered = rendered(argv.args());
    assert_eq!(rendered.first().map(String::as_str), Some("/usr/bin/bwrap"));
    assert_eq!(rendered.last().map(String::as_str), Some("true"));
    assert!(rendered.iter().any(|arg| arg == "--ro-bind-data"));
}
