//! Unit tests for sysroot-confined resolution.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::symlink;
use std::path::Path;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

/// Layout:
///
/// ```text
/// a/
/// a/b -> ../x
/// a/abs -> /x
/// a/escape -> ../../../../x
/// x/c            (file containing "hello")
/// x/dangling -> missing
/// loop1 -> loop2
/// loop2 -> loop1
/// ```
#[fixture]
fn tree() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path();
    fs::create_dir_all(root.join("a")).expect("mkdir a");
    fs::create_dir_all(root.join("x")).expect("mkdir x");
    fs::write(root.join("x/c"), "hello").expect("write c");
    symlink("../x", root.join("a/b")).expect("link b");
    symlink("/x", root.join("a/abs")).expect("link abs");
    symlink("../../../../x", root.join("a/escape")).expect("link escape");
    symlink("missing", root.join("x/dangling")).expect("link dangling");
    symlink("loop2", root.join("loop1")).expect("link loop1");
    symlink("loop1", root.join("loop2")).expect("link loop2");
    dir
}

fn open(dir: &TempDir) -> Sysroot {
    Sysroot::open(dir.path()).expect("open sysroot")
}

#[rstest]
#[case::plain("x/c", "x/c")]
#[case::leading_slash("/x/c", "x/c")]
#[case::dots("./x/./c", "x/c")]
#[case::parent_of_root("../../../x/c", "x/c")]
#[case::relative_symlink("a/b/c", "x/c")]
#[case::absolute_symlink("a/abs/c", "x/c")]
#[case::escaping_symlink("a/escape/c", "x/c")]
#[case::parent_after_symlink("a/b/../a", "a")]
#[case::root("/", "")]
#[case::empty("", "")]
fn resolves_to_canonical_path_inside_root(
    tree: TempDir,
    #[case] input: &str,
    #[case] expected: &str,
) {
    let root = open(&tree);
    let resolved = root
        .resolve(input, ResolveFlags::NONE)
        .expect("resolution succeeds");
    assert_eq!(resolved.path(), Path::new(expected));
    assert_eq!(root.host_path(&resolved), tree.path().join(expected));
}

#[rstest]
fn symlink_and_literal_spellings_agree(tree: TempDir) {
    let root = open(&tree);
    let through_link = root.resolve("a/b/c", ResolveFlags::NONE).expect("link");
    let literal = root.resolve("a/../x/c", ResolveFlags::NONE).expect("literal");
    assert_eq!(through_link.path(), literal.path());
    assert_eq!(through_link.entry_type(), EntryType::Regular);
}

#[rstest]
fn missing_segment_is_not_found(tree: TempDir) {
    let root = open(&tree);
    let error = root
        .resolve("a/nope/deeper", ResolveFlags::NONE)
        .expect_err("missing path must fail");
    assert!(error.is_not_found(), "got {error}");
    assert!(!root.exists("a/nope"));
}

#[rstest]
fn mkdir_p_creates_and_is_idempotent(tree: TempDir) {
    let root = open(&tree);
    let first = root
        .resolve("new/nested/dir", ResolveFlags::MKDIR_P)
        .expect("first resolution creates");
    let second = root
        .resolve("new/nested/dir", ResolveFlags::MKDIR_P)
        .expect("second resolution reuses");
    assert_eq!(first.path(), second.path());
    assert!(tree.path().join("new/nested/dir").is_dir());
}

#[rstest]
fn mkdir_p_follows_symlinks_into_the_root(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("a/abs/made", ResolveFlags::MKDIR_P)
        .expect("create below symlinked dir");
    assert_eq!(resolved.path(), Path::new("x/made"));
    assert!(tree.path().join("x/made").is_dir());
}

#[rstest]
fn file_in_the_middle_is_not_a_directory(tree: TempDir) {
    let root = open(&tree);
    let error = root
        .resolve("x/c/more", ResolveFlags::NONE)
        .expect_err("file cannot be traversed");
    assert!(matches!(error, ResolveError::NotADirectory { .. }), "got {error}");
}

#[rstest]
fn reject_symlinks_fails_on_any_link(tree: TempDir) {
    let root = open(&tree);
    let error = root
        .resolve("a/b/c", ResolveFlags::REJECT_SYMLINKS)
        .expect_err("link must be rejected");
    assert!(
        matches!(error, ResolveError::TooManySymlinks { limit: 0, .. }),
        "got {error}"
    );
    root.resolve("x/c", ResolveFlags::REJECT_SYMLINKS)
        .expect("link-free path still resolves");
}

#[rstest]
fn keep_final_symlink_returns_the_link_itself(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("a/b", ResolveFlags::KEEP_FINAL_SYMLINK)
        .expect("keep final link");
    assert_eq!(resolved.path(), Path::new("a/b"));
    assert_eq!(resolved.entry_type(), EntryType::Symlink);
    assert!(root.is_symlink("a/b"));
    assert!(!root.is_symlink("a"));
}

#[rstest]
fn keep_final_symlink_keeps_dangling_links(tree: TempDir) {
    let root = open(&tree);
    assert!(root.is_symlink("x/dangling"));
    assert!(!root.exists("x/dangling"));
}

#[rstest]
fn symlink_loops_hit_the_limit(tree: TempDir) {
    let root = open(&tree);
    let error = root
        .resolve("loop1", ResolveFlags::NONE)
        .expect_err("loop must fail");
    assert!(
        matches!(error, ResolveError::TooManySymlinks { limit: 40, .. }),
        "got {error}"
    );
}

#[rstest]
fn symlink_limit_is_configurable(tree: TempDir) {
    let root = open(&tree).with_symlink_limit(1);
    root.resolve("a/b/c", ResolveFlags::NONE)
        .expect("a single hop is allowed");
    let error = root
        .resolve("a/b/dangling", ResolveFlags::NONE)
        .expect_err("second hop exceeds the limit");
    assert!(
        matches!(error, ResolveError::TooManySymlinks { limit: 1, .. }),
        "got {error}"
    );
}

#[rstest]
#[case::dir_wanted_file_found("x/c", ResolveFlags::MUST_BE_DIRECTORY, ExpectedType::Directory)]
#[case::file_wanted_dir_found("x", ResolveFlags::MUST_BE_REGULAR, ExpectedType::Regular)]
fn final_type_is_checked(
    tree: TempDir,
    #[case] input: &str,
    #[case] flags: ResolveFlags,
    #[case] wanted: ExpectedType,
) {
    let root = open(&tree);
    let error = root.resolve(input, flags).expect_err("type check must fail");
    match error {
        ResolveError::WrongType { expected, .. } => assert_eq!(expected, wanted),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn readable_handles_can_be_read(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("a/b/c", ResolveFlags::READABLE | ResolveFlags::MUST_BE_REGULAR)
        .expect("readable file");
    let mut contents = String::new();
    File::from(resolved.into_fd())
        .read_to_string(&mut contents)
        .expect("read through descriptor");
    assert_eq!(contents, "hello");
}

#[rstest]
fn writable_handles_write_through_to_the_file(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("a/b/c", ResolveFlags::WRITABLE | ResolveFlags::MUST_BE_REGULAR)
        .expect("writable file");
    let mut file = File::from(resolved.into_fd());
    file.write_all(b"HELLO").expect("write through descriptor");
    drop(file);

    let contents = fs::read_to_string(tree.path().join("x/c")).expect("read back");
    assert_eq!(contents, "HELLO");
}

#[rstest]
fn readable_handles_refuse_writes(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("x/c", ResolveFlags::READABLE)
        .expect("readable file");
    let mut file = File::from(resolved.into_fd());
    assert!(file.write_all(b"nope").is_err());
}

#[rstest]
fn writable_directories_are_refused(tree: TempDir) {
    let root = open(&tree);
    let error = root
        .resolve("x", ResolveFlags::WRITABLE)
        .expect_err("directories cannot be opened for writing");
    assert!(
        matches!(error, ResolveError::Io { operation: "open", .. }),
        "got {error}"
    );
}

#[rstest]
fn readable_directories_can_be_listed(tree: TempDir) {
    let root = open(&tree);
    let resolved = root
        .resolve("x", ResolveFlags::READABLE | ResolveFlags::MUST_BE_DIRECTORY)
        .expect("readable dir");
    assert_eq!(resolved.entry_type(), EntryType::Directory);
    let listing = format!("/proc/self/fd/{}", resolved.fd().as_raw_fd());
    let names: Vec<_> = fs::read_dir(listing)
        .expect("list directory")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name())
        .collect();
    assert!(names.iter().any(|name| name == "c"));
}

#[rstest]
fn read_link_returns_literal_target(tree: TempDir) {
    let root = open(&tree);
    assert_eq!(
        root.read_link("a/escape").expect("read link"),
        Path::new("../../../../x")
    );
    let error = root.read_link("x/c").expect_err("not a link");
    assert!(error.is_wrong_type(), "got {error}");
}

#[test]
fn opening_a_missing_root_fails() {
    let error = Sysroot::open("/nonexistent/vessel/root").expect_err("missing root");
    assert!(error.is_not_found(), "got {error}");
}

#[test]
fn flags_debug_lists_set_members() {
    let flags = ResolveFlags::MKDIR_P | ResolveFlags::READABLE;
    assert_eq!(format!("{flags:?}"), "MKDIR_P | READABLE");
    assert_eq!(format!("{:?}", ResolveFlags::WRITABLE), "WRITABLE");
    assert_eq!(format!("{:?}", ResolveFlags::NONE), "NONE");
    assert!(flags.contains(ResolveFlags::MKDIR_P));
    assert!(!flags.contains(ResolveFlags::REJECT_SYMLINKS));
}
