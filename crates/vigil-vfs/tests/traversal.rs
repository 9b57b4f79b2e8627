//! Bounded traversal: depth, budget, pruning, cycles, and ordering.

use std::collections::HashSet;
use std::sync::Arc;

use vigil_test::{init_tracing, project_backend, MockBackend};
use vigil_vfs::{FileSystem, VfsError, VisitOptions};

fn all_project_paths() -> HashSet<String> {
    [
        "/proj/",
        "/proj/a.js",
        "/proj/b.js",
        "/proj/src/",
        "/proj/src/main.js",
        "/proj/src/util.js",
        "/proj/node_modules/",
        "/proj/node_modules/dep/",
        "/proj/node_modules/dep/index.js",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[tokio::test]
async fn test_visit_walks_the_whole_tree() {
    init_tracing();
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let proj = fs.get_directory_for_path("/proj").unwrap();
    let mut seen = HashSet::new();
    proj.visit(
        |entry, _stats| {
            seen.insert(entry.path());
            true
        },
        VisitOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(seen, all_project_paths());
}

#[tokio::test]
async fn test_visit_single_file() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let a = fs.get_file_for_path("/proj/a.js").unwrap();
    let mut seen = Vec::new();
    a.visit(
        |entry, stats| {
            seen.push((entry.path(), stats.is_file()));
            true
        },
        VisitOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(seen, vec![("/proj/a.js".to_string(), true)]);
}

#[tokio::test]
async fn test_visit_depth_bound() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    let proj = fs.get_directory_for_path("/proj").unwrap();

    let mut seen = Vec::new();
    proj.visit(
        |entry, _| {
            seen.push(entry.path());
            true
        },
        VisitOptions::default().with_max_depth(0),
    )
    .await
    .unwrap();
    assert_eq!(seen, vec!["/proj/".to_string()]);

    let mut seen = HashSet::new();
    proj.visit(
        |entry, _| {
            seen.insert(entry.path());
            true
        },
        VisitOptions::default().with_max_depth(1),
    )
    .await
    .unwrap();
    let expected: HashSet<String> = [
        "/proj/",
        "/proj/a.js",
        "/proj/b.js",
        "/proj/src/",
        "/proj/node_modules/",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_visit_entry_budget() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    let proj = fs.get_directory_for_path("/proj").unwrap();

    let mut count = 0_usize;
    let result = proj
        .visit(
            |_, _| {
                count += 1;
                true
            },
            VisitOptions::default().with_max_entries(3),
        )
        .await;

    match result {
        Err(VfsError::TooManyEntries(path)) => assert_eq!(path, "/proj/"),
        other => panic!("expected TooManyEntries, got {other:?}"),
    }
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_visitor_prunes_subtrees_not_siblings() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    let proj = fs.get_directory_for_path("/proj").unwrap();

    let mut seen = HashSet::new();
    proj.visit(
        |entry, _| {
            seen.insert(entry.path());
            entry.path() != "/proj/node_modules/"
        },
        VisitOptions::default(),
    )
    .await
    .unwrap();

    // the pruned directory itself is visited, its contents are not
    assert!(seen.contains("/proj/node_modules/"));
    assert!(!seen.contains("/proj/node_modules/dep/"));
    assert!(seen.contains("/proj/src/main.js"));
}

#[tokio::test]
async fn test_visit_sorted_is_case_insensitive() {
    let backend = Arc::new(MockBackend::new().with_tree(&["/d/", "/d/B.txt", "/d/a.txt", "/d/C/"]));
    let fs = FileSystem::new(backend.clone());
    let dir = fs.get_directory_for_path("/d").unwrap();

    let mut order = Vec::new();
    dir.visit(
        |entry, _| {
            order.push(entry.name());
            true
        },
        VisitOptions::default().with_sort_list(true),
    )
    .await
    .unwrap();

    assert_eq!(order, vec!["d", "a.txt", "B.txt", "C"]);
}

#[tokio::test]
async fn test_visit_terminates_on_link_cycle() {
    let backend = project_backend();
    backend.insert_dir("/proj/loop");
    backend.set_real_path("/proj/loop/", "/proj/");
    let fs = FileSystem::new(backend.clone());
    let proj = fs.get_directory_for_path("/proj").unwrap();

    let mut seen = Vec::new();
    proj.visit(
        |entry, _| {
            seen.push(entry.path());
            true
        },
        VisitOptions::default(),
    )
    .await
    .unwrap();

    // the loop entry resolves to an already visited directory and is
    // pruned before the visitor sees it
    assert!(!seen.contains(&"/proj/loop/".to_string()));
    assert_eq!(seen.iter().filter(|p| *p == "/proj/").count(), 1);
    assert!(seen.contains(&"/proj/src/main.js".to_string()));
}

#[tokio::test]
async fn test_visit_concurrent_children() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    let proj = fs.get_directory_for_path("/proj").unwrap();

    let mut seen = HashSet::new();
    proj.visit(
        |entry, _| {
            seen.insert(entry.path());
            true
        },
        VisitOptions::default().with_concurrency(4),
    )
    .await
    .unwrap();

    assert_eq!(seen, all_project_paths());
}

#[tokio::test]
async fn test_visit_aborts_on_listing_failure() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());
    backend.fail_next("readdir", "/proj/src/", VfsError::NotReadable("/proj/src/".to_string()));

    let proj = fs.get_directory_for_path("/proj").unwrap();
    let result = proj.visit(|_, _| true, VisitOptions::default()).await;
    assert!(matches!(result, Err(VfsError::NotReadable(_))));
}

#[tokio::test]
async fn test_visit_requires_startable_root() {
    let backend = project_backend();
    let fs = FileSystem::new(backend.clone());

    let ghost = fs.get_file_for_path("/proj/ghost.txt").unwrap();
    let mut visited = 0_usize;
    let result = ghost
        .visit(
            |_, _| {
                visited += 1;
                true
            },
            VisitOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(VfsError::NotFound(_))));
    assert_eq!(visited, 0);
}
