//! Request-level transactions: atomicity, policy and nesting.

use serde_json::json;
use tally::config::TallyConfig;
use tally::context::{
    ambient, handle_request, HttpMethod, MutatingMethods, NeverWrap, RequestContext,
};
use tally::error::TallyError;

use crate::integration::fresh_global;
use crate::integration::test_utils::fresh_global_with;

async fn create_ledger(name: &str) -> Result<(), TallyError> {
    let db = ambient::db()?;
    db.put_json(&format!("ledger:{name}"), &json!({ "name": name }))?;
    Ok(())
}

async fn open_cash_account(ledger: &str, fail: bool) -> Result<(), TallyError> {
    ambient::db()?.insert(&format!("account:{ledger}:cash"), "0")?;
    if fail {
        return Err(TallyError::Handler("account already exists".to_string()));
    }
    Ok(())
}

async fn create_ledger_with_account(name: &str, fail: bool) -> Result<(), TallyError> {
    create_ledger(name).await?;
    // Nested transaction joins the request's transaction.
    ambient::run_transaction(|| open_cash_account(name, fail)).await
}

fn post(url: &str) -> RequestContext {
    RequestContext::new("ledgers.create", url, HttpMethod::Post)
}

#[tokio::test]
async fn failed_mutation_leaves_no_writes() {
    let global = fresh_global();
    let result = handle_request(global.clone(), post("/ledgers"), &MutatingMethods, || {
        create_ledger_with_account("household", true)
    })
    .await;

    assert!(matches!(result, Err(TallyError::Handler(_))));
    assert!(global.db().get("ledger:household").unwrap().is_none());
    assert!(global.db().get("account:household:cash").unwrap().is_none());
}

#[tokio::test]
async fn successful_mutation_commits_every_write() {
    let global = fresh_global();
    handle_request(global.clone(), post("/ledgers"), &MutatingMethods, || {
        create_ledger_with_account("travel", false)
    })
    .await
    .unwrap();

    assert!(global.db().get("ledger:travel").unwrap().is_some());
    assert_eq!(
        global.db().get("account:travel:cash").unwrap().as_deref(),
        Some(&b"0"[..])
    );
}

#[tokio::test]
async fn writes_are_invisible_outside_until_commit() {
    let global = fresh_global();
    let observer = global.clone();
    handle_request(global.clone(), post("/ledgers"), &MutatingMethods, || async move {
        create_ledger("pending").await?;
        assert!(ambient::db()?.get("ledger:pending")?.is_some());
        assert!(observer.db().get("ledger:pending")?.is_none());
        Ok::<(), TallyError>(())
    })
    .await
    .unwrap();
    assert!(global.db().get("ledger:pending").unwrap().is_some());
}

#[tokio::test]
async fn reads_and_opted_out_requests_are_not_wrapped() {
    let global = fresh_global();
    let get = RequestContext::new("ledgers.list", "/ledgers", HttpMethod::Get);
    let wrapped = handle_request(global.clone(), get, &MutatingMethods, || async {
        Ok::<bool, TallyError>(ambient::in_transaction())
    })
    .await
    .unwrap();
    assert!(!wrapped);

    let wrapped = handle_request(global.clone(), post("/ledgers"), &NeverWrap, || async {
        Ok::<bool, TallyError>(ambient::in_transaction())
    })
    .await
    .unwrap();
    assert!(!wrapped);

    let mut config = TallyConfig::default();
    config.transactions.wrap_mutations = false;
    let unwrapped_global = fresh_global_with(config);
    let wrapped = handle_request(unwrapped_global, post("/ledgers"), &MutatingMethods, || async {
        Ok::<bool, TallyError>(ambient::in_transaction())
    })
    .await
    .unwrap();
    assert!(!wrapped);
}

#[tokio::test]
async fn timing_instrumentation_never_cancels() {
    let mut config = TallyConfig::default();
    config.transactions.timing.enabled = true;
    config.transactions.timing.budget_ms = 1;
    let global = fresh_global_with(config);

    let mut request = post("/ledgers");
    request.start_time = chrono::Utc::now() - chrono::Duration::seconds(5);
    handle_request(global.clone(), request, &MutatingMethods, || {
        create_ledger_with_account("late", false)
    })
    .await
    .unwrap();
    assert!(global.db().get("ledger:late").unwrap().is_some());
}

#[tokio::test]
async fn sibling_chain_never_sees_staged_writes() {
    let global = fresh_global();
    let (staged_tx, staged_rx) = tokio::sync::oneshot::channel::<()>();
    let (checked_tx, checked_rx) = tokio::sync::oneshot::channel::<(bool, bool)>();

    let writer = handle_request(global.clone(), post("/ledgers"), &MutatingMethods, || async move {
        create_ledger("staged").await?;
        assert!(ambient::in_transaction());
        let _ = staged_tx.send(());
        // Stay open until the sibling has looked.
        let seen = checked_rx
            .await
            .map_err(|_| TallyError::Handler("sibling chain dropped".to_string()))?;
        Ok::<(bool, bool), TallyError>(seen)
    });

    let reader = handle_request(
        global.clone(),
        RequestContext::new("ledgers.show", "/ledgers/staged", HttpMethod::Get),
        &MutatingMethods,
        || async move {
            staged_rx
                .await
                .map_err(|_| TallyError::Handler("writer chain dropped".to_string()))?;
            let in_tx = ambient::in_transaction();
            let visible = ambient::db()?.get("ledger:staged")?.is_some();
            let _ = checked_tx.send((in_tx, visible));
            Ok::<(), TallyError>(())
        },
    );

    let (written, read) = tokio::join!(writer, reader);
    read.unwrap();
    let (sibling_in_tx, sibling_saw_write) = written.unwrap();
    assert!(!sibling_in_tx);
    assert!(!sibling_saw_write);
    assert!(global.db().get("ledger:staged").unwrap().is_some());
}
