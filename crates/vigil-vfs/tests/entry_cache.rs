//! Entry resolution and watch-gated stat caching.

use vigil_test::{init_tracing, project_backend};
use vigil_vfs::{FileSystem, IgnoreRules, RootFilter, VfsError};

#[tokio::test]
async fn test_resolution_converges_on_shared_records() {
    init_tracing();
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    let same = fs.get_file_for_path("/proj/a.js/").unwrap();
    assert_eq!(a, same);
    assert_eq!(a.id(), same.id());
    assert_eq!(a.path(), "/proj/a.js");
    assert_eq!(a.name(), "a.js");
    assert_eq!(a.parent_path().as_deref(), Some("/proj/"));

    let dir = fs.get_directory_for_path("/proj/src").unwrap();
    assert!(dir.is_directory());
    assert_eq!(dir.path(), "/proj/src/");

    // same name as a file, different kind, distinct record
    let file_form = fs.get_file_for_path("/proj/src").unwrap();
    assert!(file_form.is_file());
    assert_ne!(dir.id(), file_form.id());
}

#[tokio::test]
async fn test_resolution_rejects_bad_paths() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    assert!(matches!(
        fs.get_file_for_path("proj/a.js"),
        Err(VfsError::InvalidParams(_))
    ));
    assert!(matches!(fs.resolve("x"), Err(VfsError::InvalidParams(_))));
    // the root cannot be a file
    assert!(matches!(
        fs.get_file_for_path("/"),
        Err(VfsError::InvalidParams(_))
    ));
    assert!(fs.get_directory_for_path("/").is_ok());
}

#[tokio::test]
async fn test_resolve_uses_trailing_slash_rule() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    assert!(fs.resolve("/proj/src/").unwrap().is_directory());
    assert!(fs.resolve("/proj/a.js").unwrap().is_file());

    let root = fs.get_directory_for_path("/").unwrap();
    assert_eq!(root.name(), "");
    assert!(root.parent_directory().is_none());

    let src = fs.resolve("/proj/src/").unwrap();
    let parent = src.parent_directory().unwrap();
    assert_eq!(parent.path(), "/proj/");
}

#[tokio::test]
async fn test_stat_unwatched_always_hits_backend() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    assert!(!a.is_watched());
    a.stat().await.unwrap();
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 2);
}

#[tokio::test]
async fn test_stat_cached_while_watched() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    assert!(a.is_watched());
    let first = a.stat().await.unwrap();
    let second = a.stat().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);
}

#[tokio::test]
async fn test_exists_answers_from_cached_stat() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    a.stat().await.unwrap();
    assert!(a.exists().await.unwrap());
    assert_eq!(backend.call_count("exists", "/proj/a.js"), 0);
}

#[tokio::test]
async fn test_nonexistence_and_errors_leave_no_stale_cache() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    backend.remove("/proj/a.js");

    assert!(!a.exists().await.unwrap());
    assert!(matches!(a.stat().await, Err(VfsError::NotFound(_))));

    // the entry reappears on the backend and reads see it immediately
    backend.insert_file("/proj/a.js");
    assert!(a.exists().await.unwrap());
    assert!(a.stat().await.is_ok());
}

#[tokio::test]
async fn test_stat_failure_propagates_then_recovers() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    backend.fail_next("stat", "/proj/a.js", VfsError::NotReadable("/proj/a.js".to_string()));

    assert!(matches!(a.stat().await, Err(VfsError::NotReadable(_))));
    assert!(a.stat().await.is_ok());
    // third call is served from cache
    assert!(a.stat().await.is_ok());
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 2);
}

#[tokio::test]
async fn test_unwatch_decays_to_read_through() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);

    fs.unwatch("/proj").await.unwrap();
    assert!(!a.is_watched());
    a.stat().await.unwrap();
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 3);
}

#[tokio::test]
async fn test_ignore_filter_excludes_subtree_from_caching() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    let rules = IgnoreRules::from_content("/proj/", "node_modules/\n").unwrap();
    fs.watch("/proj", RootFilter::Ignore(rules)).await.unwrap();

    let dep = fs
        .get_file_for_path("/proj/node_modules/dep/index.js")
        .unwrap();
    assert!(!dep.is_watched());
    dep.stat().await.unwrap();
    dep.stat().await.unwrap();
    assert_eq!(
        backend.call_count("stat", "/proj/node_modules/dep/index.js"),
        2
    );

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    assert!(a.is_watched());
    a.stat().await.unwrap();
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);
}

#[tokio::test]
async fn test_custom_filter_gates_entries_by_name() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::custom(|name, _parent| name != "b.js"))
        .await
        .unwrap();

    assert!(fs.get_file_for_path("/proj/a.js").unwrap().is_watched());
    assert!(!fs.get_file_for_path("/proj/b.js").unwrap().is_watched());
}

#[tokio::test]
async fn test_rewatching_mints_fresh_associations() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    assert!(a.is_watched());

    fs.unwatch("/proj").await.unwrap();
    assert!(!a.is_watched());

    // the new root has a different filter; no stale verdict survives
    fs.watch("/proj", RootFilter::custom(|name, _parent| name != "a.js"))
        .await
        .unwrap();
    assert!(!a.is_watched());
    assert!(fs.get_file_for_path("/proj/b.js").unwrap().is_watched());
}
