//! Unit tests for staged tree materialisation.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::symlink;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct Staged {
    _dir: TempDir,
    source: PathBuf,
}

/// `<tmp>/etc/vessel` holding `conf.d/`, `motd` and `current -> conf.d`.
#[fixture]
fn staged() -> Staged {
    let dir = TempDir::new().expect("temp dir");
    let source = dir.path().join("etc/vessel");
    fs::create_dir_all(source.join("conf.d")).expect("mkdir conf.d");
    fs::write(source.join("motd"), "welcome\n").expect("write motd");
    symlink("conf.d", source.join("current")).expect("link current");
    Staged { _dir: dir, source }
}

#[rstest]
fn emits_one_entry_per_object(staged: Staged) {
    let plan = copy_tree(&staged.source, Path::new("/etc/vessel")).expect("copy tree");

    let destinations: Vec<_> = plan
        .entries()
        .iter()
        .map(|entry| entry.destination().to_path_buf())
        .collect();
    assert_eq!(
        destinations,
        [
            PathBuf::from("/etc/vessel"),
            PathBuf::from("/etc/vessel/conf.d"),
            PathBuf::from("/etc/vessel/current"),
            PathBuf::from("/etc/vessel/motd"),
        ]
    );
    plan.validate_order().expect("walk order is parent first");
}

#[rstest]
fn symlink_targets_are_kept_verbatim(staged: Staged) {
    let plan = copy_tree(&staged.source, Path::new("/etc/vessel")).expect("copy tree");
    let target = plan.entries().iter().find_map(|entry| match entry {
        MountPlanEntry::Symlink { target, .. } => Some(target.clone()),
        _ => None,
    });
    assert_eq!(target, Some(PathBuf::from("conf.d")));
}

#[rstest]
fn file_content_survives_removal_of_the_staging_tree(staged: Staged) {
    let Staged { _dir: dir, source } = staged;
    let plan = copy_tree(&source, Path::new("/etc/vessel")).expect("copy tree");
    drop(dir);

    let (_, fds) = plan.into_launcher_args().into_parts();
    assert_eq!(fds.len(), 1);
    let mut contents = String::new();
    for fd in fds {
        File::from(fd)
            .read_to_string(&mut contents)
            .expect("read embedded descriptor");
    }
    assert_eq!(contents, "welcome\n");
}

#[rstest]
fn sockets_are_skipped(staged: Staged) {
    let _listener = UnixListener::bind(staged.source.join("sock")).expect("bind socket");
    let plan = copy_tree(&staged.source, Path::new("/etc/vessel")).expect("copy tree");
    assert!(
        plan.entries()
            .iter()
            .all(|entry| entry.destination() != Path::new("/etc/vessel/sock"))
    );
    assert_eq!(plan.len(), 4);
}

#[rstest]
#[case::relative("etc/vessel")]
fn relative_destination_is_rejected(staged: Staged, #[case] dest: &str) {
    let error = copy_tree(&staged.source, Path::new(dest)).expect_err("relative dest");
    assert!(matches!(error, PlanError::RelativeDestination(_)), "got {error}");
}

#[rstest]
#[case::different_leaf("/etc/other")]
#[case::longer_than_source("/deep/etc/vessel/more")]
fn mismatched_suffix_is_rejected(staged: Staged, #[case] dest: &str) {
    let error = copy_tree(&staged.source, Path::new(dest)).expect_err("suffix mismatch");
    assert!(matches!(error, PlanError::SuffixMismatch { .. }), "got {error}");
}

#[rstest]
fn source_must_be_a_directory(staged: Staged) {
    let file = staged.source.join("motd");
    let error = copy_tree(&file, Path::new("/motd")).expect_err("file source");
    assert!(matches!(error, PlanError::NotADirectory(_)), "got {error}");
}
