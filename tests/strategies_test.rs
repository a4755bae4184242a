use std::fs;
use std::path::Path;

use pvshift::engine::Engine;
use pvshift::engine::sequential::SequentialEngine;
use pvshift::strategy::native_copy::NativeCopy;
use pvshift::strategy::rsync_local::RsyncLocal;
use pvshift::strategy::rsync_ssh::RsyncSsh;
use pvshift::strategy::{Strategy, StrategyRegistry};
use pvshift::task::{Task, TaskOptions, Volume, cancel_pair};

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn local_task(source: &Path, dest: &Path, options: TaskOptions) -> Task {
    Task::new(
        Volume::Local(source.to_path_buf()),
        Volume::Local(dest.to_path_buf()),
        options,
    )
}

/// A small tree: two files at the top, one nested.
fn seed_source(root: &Path) {
    write(&root.join("a.txt"), "alpha");
    write(&root.join("b.txt"), "bravo");
    write(&root.join("nested/deep/c.txt"), "charlie");
}

fn leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".pvshift-"))
        .collect()
}

#[tokio::test]
async fn native_copy_copies_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);
    let task = local_task(&source, &dest, TaskOptions::default());

    assert!(NativeCopy.can_do(&task).await);
    NativeCopy.run(&task).await.unwrap();
    NativeCopy.cleanup(&task).await.unwrap();

    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(dest.join("nested/deep/c.txt")).unwrap(), "charlie");
    assert!(leftovers(&dest).is_empty());
}

#[tokio::test]
async fn native_copy_overwrites_and_keeps_extras_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);
    write(&dest.join("a.txt"), "stale");
    write(&dest.join("nested/extra.txt"), "keep me");
    write(&dest.join("top-extra.txt"), "keep me too");

    let task = local_task(&source, &dest, TaskOptions::default());
    NativeCopy.run(&task).await.unwrap();

    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
    assert!(dest.join("nested/extra.txt").exists());
    assert!(dest.join("top-extra.txt").exists());
    assert!(dest.join("nested/deep/c.txt").exists());
}

#[tokio::test]
async fn native_copy_deletes_extraneous_when_asked() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);
    write(&dest.join("nested/extra.txt"), "gone");
    write(&dest.join("old/dir/file.txt"), "gone");

    let options = TaskOptions {
        delete_extraneous: true,
        ..TaskOptions::default()
    };
    let task = local_task(&source, &dest, options);
    NativeCopy.run(&task).await.unwrap();

    assert!(!dest.join("nested/extra.txt").exists());
    assert!(!dest.join("old").exists());
    assert!(dest.join("nested/deep/c.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn native_copy_preserves_symlinks_and_modes() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);
    std::os::unix::fs::symlink("a.txt", source.join("link")).unwrap();
    fs::set_permissions(source.join("b.txt"), fs::Permissions::from_mode(0o600)).unwrap();

    let task = local_task(&source, &dest, TaskOptions::default());
    NativeCopy.run(&task).await.unwrap();

    assert_eq!(fs::read_link(dest.join("link")).unwrap(), Path::new("a.txt"));
    let mode = fs::metadata(dest.join("b.txt")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn native_copy_refuses_overlapping_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    seed_source(&source);

    let inside = local_task(&source, &source.join("nested/copy"), TaskOptions::default());
    assert!(!NativeCopy.can_do(&inside).await);

    let same = local_task(&source, &source, TaskOptions::default());
    assert!(!NativeCopy.can_do(&same).await);

    let parent = local_task(&source, tmp.path(), TaskOptions::default());
    assert!(!NativeCopy.can_do(&parent).await);
}

#[tokio::test]
async fn rsync_local_refuses_overlapping_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("data");
    seed_source(&source);

    let nested = local_task(&source, &source.join("backup"), TaskOptions::default());
    assert!(!RsyncLocal.can_do(&nested).await);

    let parent = local_task(&source, tmp.path(), TaskOptions::default());
    assert!(!RsyncLocal.can_do(&parent).await);
}

#[cfg(unix)]
#[tokio::test]
async fn native_copy_rejects_fifo_instead_of_blocking() {
    use std::time::Duration;

    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    write(&source.join("a.txt"), "alpha");
    let status = std::process::Command::new("mkfifo")
        .arg(source.join("pipe"))
        .status()
        .unwrap();
    assert!(status.success());

    let task = local_task(&source, &dest, TaskOptions::default());
    let err = tokio::time::timeout(Duration::from_secs(5), NativeCopy.run(&task))
        .await
        .expect("copy blocked on the fifo")
        .unwrap_err();
    assert!(err.to_string().contains("special file"), "{err:#}");
    assert!(err.to_string().contains("pipe"), "{err:#}");

    NativeCopy.cleanup(&task).await.unwrap();
    assert!(leftovers(&dest).is_empty());
}

#[tokio::test]
async fn native_copy_needs_existing_source_and_local_sides() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = local_task(
        &tmp.path().join("missing"),
        &tmp.path().join("dest"),
        TaskOptions::default(),
    );
    assert!(!NativeCopy.can_do(&missing).await);

    let remote = Task::new(
        Volume::Local(tmp.path().to_path_buf()),
        Volume::parse("nas:/vol").unwrap(),
        TaskOptions::default(),
    );
    assert!(!NativeCopy.can_do(&remote).await);
    assert!(!RsyncLocal.can_do(&remote).await);
}

#[tokio::test]
async fn cancelled_native_copy_fails_and_cleanup_clears_staging() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);

    let (handle, token) = cancel_pair();
    let task = local_task(&source, &dest, TaskOptions::default()).with_cancel(token);
    handle.cancel();

    let err = NativeCopy.run(&task).await.unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert!(!leftovers(&dest).is_empty());

    NativeCopy.cleanup(&task).await.unwrap();
    assert!(leftovers(&dest).is_empty());
    assert!(!dest.join("a.txt").exists());
}

#[tokio::test]
async fn cleanup_without_run_is_harmless() {
    let tmp = tempfile::tempdir().unwrap();
    let task = local_task(
        &tmp.path().join("source"),
        &tmp.path().join("dest"),
        TaskOptions::default(),
    );
    NativeCopy.cleanup(&task).await.unwrap();
    RsyncLocal.cleanup(&task).await.unwrap();
    RsyncSsh.cleanup(&task).await.unwrap();
}

#[tokio::test]
async fn rsync_ssh_is_not_feasible_between_local_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    seed_source(&source);
    let task = local_task(&source, &tmp.path().join("dest"), TaskOptions::default());
    assert!(!RsyncSsh.can_do(&task).await);
}

#[tokio::test]
async fn builtin_registry_migrates_local_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let dest = tmp.path().join("dest");
    seed_source(&source);

    let registry = StrategyRegistry::builtin();
    let task = local_task(&source, &dest, TaskOptions::default());
    let outcome = SequentialEngine::new()
        .execute(&task, registry.strategies())
        .await;

    let selected = outcome.selected().map(str::to_string);
    assert!(outcome.is_success(), "{:?}", outcome.into_result());
    assert!(matches!(selected.as_deref(), Some("rsync-local") | Some("native-copy")));
    assert_eq!(fs::read_to_string(dest.join("b.txt")).unwrap(), "bravo");
    assert_eq!(fs::read_to_string(dest.join("nested/deep/c.txt")).unwrap(), "charlie");
    assert!(leftovers(&dest).is_empty());
}
