//! Watched-root lifecycle and external change intake.

use vigil_test::{init_tracing, next_event, project_backend, settle};
use vigil_vfs::{FileSystem, FsEvent, RootFilter, VfsError};

#[tokio::test]
async fn test_watch_rejects_paths_inside_existing_root() {
    init_tracing();
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();
    assert!(matches!(
        fs.watch("/proj/src", RootFilter::AllowAll).await,
        Err(VfsError::InvalidParams(_))
    ));
    assert!(matches!(
        fs.watch("/proj", RootFilter::AllowAll).await,
        Err(VfsError::InvalidParams(_))
    ));
}

#[tokio::test]
async fn test_watch_failure_leaves_no_root_behind() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    backend.fail_next("watch", "/proj/", VfsError::Unknown("watcher exploded".to_string()));
    assert!(matches!(
        fs.watch("/proj", RootFilter::AllowAll).await,
        Err(VfsError::Unknown(_))
    ));

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    assert!(!a.is_watched());

    // nothing stale blocks a retry
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();
    assert!(a.is_watched());
}

#[tokio::test]
async fn test_unwatch_requires_exact_root_path() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    assert!(matches!(
        fs.unwatch("/proj/src").await,
        Err(VfsError::RootNotWatched(_))
    ));
    assert!(matches!(
        fs.unwatch("/elsewhere").await,
        Err(VfsError::RootNotWatched(_))
    ));

    fs.unwatch("/proj").await.unwrap();
    assert!(matches!(
        fs.unwatch("/proj").await,
        Err(VfsError::RootNotWatched(_))
    ));

    assert_eq!(backend.call_count("watch", "/proj/"), 1);
    assert_eq!(backend.call_count("unwatch", "/proj/"), 1);
}

#[tokio::test]
async fn test_external_file_change_reprimes_and_fires() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);

    backend.touch("/proj/a.js");
    let fresh = backend.stats_for("/proj/a.js").unwrap();
    let mut events = fs.subscribe();

    fs.notify_external_change(Some("/proj/a.js"), Some(fresh.clone()))
        .await;

    let event = next_event(&mut events).await;
    assert!(matches!(
        &*event,
        FsEvent::Changed { path: Some(p), .. } if p == "/proj/a.js"
    ));

    // the provided stats were installed; no extra backend stat happened
    assert_eq!(a.stat().await.unwrap(), fresh);
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);
}

#[tokio::test]
async fn test_external_change_with_unchanged_mtime_is_suppressed() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    a.stat().await.unwrap();
    let echoed = backend.stats_for("/proj/a.js");
    let mut events = fs.subscribe();

    fs.notify_external_change(Some("/proj/a.js"), echoed).await;

    settle().await;
    assert!(events.try_recv().is_none());
    // the cache survived the echo
    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 1);
}

#[tokio::test]
async fn test_external_directory_change_diffs_children() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let proj = fs.get_directory_for_path("/proj").unwrap();
    proj.read_contents().await.unwrap();
    let mut events = fs.subscribe();

    backend.insert_file("/proj/new.txt");
    backend.touch("/proj/");
    fs.notify_external_change(Some("/proj/"), backend.stats_for("/proj/"))
        .await;

    let event = next_event(&mut events).await;
    match &*event {
        FsEvent::Changed {
            path,
            added,
            removed,
        } => {
            assert_eq!(path.as_deref(), Some("/proj/"));
            assert_eq!(added, &vec!["/proj/new.txt".to_string()]);
            assert!(removed.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_external_change_for_unresolved_path_is_ignored() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();
    let mut events = fs.subscribe();

    fs.notify_external_change(Some("/proj/never-resolved.txt"), None)
        .await;

    settle().await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_external_change_without_path_drops_every_cache() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    a.stat().await.unwrap();
    let proj = fs.get_directory_for_path("/proj").unwrap();
    proj.read_contents().await.unwrap();
    let mut events = fs.subscribe();

    fs.notify_external_change(None, None).await;

    let event = next_event(&mut events).await;
    assert_eq!(
        *event,
        FsEvent::Changed {
            path: None,
            added: Vec::new(),
            removed: Vec::new(),
        }
    );

    a.stat().await.unwrap();
    assert_eq!(backend.call_count("stat", "/proj/a.js"), 2);
    proj.read_contents().await.unwrap();
    assert_eq!(backend.call_count("readdir", "/proj/"), 2);
}

#[tokio::test]
async fn test_watched_project_end_to_end() {
    init_tracing();
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    fs.watch("/proj", RootFilter::AllowAll).await.unwrap();

    let proj = fs.get_directory_for_path("/proj").unwrap();
    let contents = proj.read_contents().await.unwrap();
    assert_eq!(contents.entries.len(), 4);

    let b = fs.get_file_for_path("/proj/b.js").unwrap();
    let old_id = b.id();
    let mut events = fs.subscribe();

    // someone deletes b.js outside this process
    backend.remove("/proj/b.js");
    backend.touch("/proj/");
    fs.notify_external_change(Some("/proj/"), backend.stats_for("/proj/"))
        .await;

    let event = next_event(&mut events).await;
    match &*event {
        FsEvent::Changed { path, removed, .. } => {
            assert_eq!(path.as_deref(), Some("/proj/"));
            assert_eq!(removed, &vec!["/proj/b.js".to_string()]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(!b.exists().await.unwrap());
    let fresh = fs.get_file_for_path("/proj/b.js").unwrap();
    assert_ne!(fresh.id(), old_id);
}
