//! Canned trees and small async helpers for event-driven assertions.

use std::sync::Arc;
use std::time::Duration;

use vigil_vfs::{EventReceiver, FsEvent};

use crate::mock::MockBackend;

/// Standard project tree used across integration tests:
///
/// ```text
/// /proj/
///   a.js
///   b.js
///   src/
///     main.js
///     util.js
///   node_modules/
///     dep/
///       index.js
/// ```
#[must_use]
pub fn project_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::new().with_tree(&[
        "/proj/",
        "/proj/a.js",
        "/proj/b.js",
        "/proj/src/",
        "/proj/src/main.js",
        "/proj/src/util.js",
        "/proj/node_modules/",
        "/proj/node_modules/dep/",
        "/proj/node_modules/dep/index.js",
    ]))
}

/// Initializes test logging once, honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receives the next event, panicking after one second.
///
/// # Panics
///
/// When no event arrives in time or the bus is gone.
pub async fn next_event(receiver: &mut EventReceiver) -> Arc<FsEvent> {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event bus closed")
}

/// Waits long enough for spawned bookkeeping tasks to run.
pub async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(25)).await;
}
