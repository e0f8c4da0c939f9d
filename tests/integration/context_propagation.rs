//! Ambient binding visibility across awaits and tasks.

use std::sync::Arc;
use std::time::Duration;

use tally::context::{ambient, run, HttpMethod, RequestContext};
use tally::error::ContextError;

use crate::integration::fresh_global;

async fn observed_request_id() -> String {
    ambient::request()
        .map(|r| r.request_id.clone())
        .unwrap_or_else(|_| "<unbound>".to_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chains_each_see_their_own_request() {
    let global = fresh_global();
    let mut handles = Vec::new();

    for i in 0..16 {
        let global = Arc::clone(&global);
        handles.push(tokio::spawn(async move {
            let request = Arc::new(RequestContext::new(
                format!("route-{i}"),
                format!("/items/{i}"),
                HttpMethod::Get,
            ));
            let expected = request.request_id.clone();
            let seen = run(global, request, async {
                let mut seen = Vec::new();
                for step in 0..10u64 {
                    tokio::time::sleep(Duration::from_millis(step % 3)).await;
                    tokio::task::yield_now().await;
                    seen.push(observed_request_id().await);
                }
                seen
            })
            .await;
            (expected, seen)
        }));
    }

    for handle in handles {
        let (expected, seen) = handle.await.unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|id| *id == expected));
    }
}

#[tokio::test]
async fn spawned_task_does_not_inherit_binding() {
    let global = fresh_global();
    let request = Arc::new(RequestContext::new("outer", "/outer", HttpMethod::Post));

    let (inside, spawned) = run(global, request, async {
        let inside = ambient::global().is_ok();
        let spawned = tokio::spawn(async { ambient::global().err() })
            .await
            .unwrap();
        (inside, spawned)
    })
    .await;

    assert!(inside);
    assert_eq!(spawned, Some(ContextError::Missing { accessor: "global" }));
}

#[tokio::test]
async fn binding_ends_with_the_future() {
    let global = fresh_global();
    let request = Arc::new(RequestContext::new("once", "/once", HttpMethod::Get));
    run(global, request, async {
        assert!(ambient::config().is_ok());
        assert!(ambient::logger("ledger").is_ok());
    })
    .await;

    assert!(ambient::request().is_err());
    assert!(ambient::try_request().is_none());
}
