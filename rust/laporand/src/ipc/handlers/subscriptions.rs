use crate::error::AppError;
use crate::ipc::helpers::{reply, require_admin, required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{snapshot_records, Collection};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

/// Streams full snapshots of a report collection as `snapshot` events until
/// cancelled. Each event replaces the previous one.
async fn start(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let name = required_str(&req.params, "collection")?;
    let collection = Collection::parse(&name)
        .filter(|c| *c != Collection::Users)
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("cannot subscribe to {name:?}"),
            details: Some(json!({ "allowed": ["facilityReports", "dutyReports"] })),
        })?;
    let store = store(state)?;
    let mut rx = store.subscribe(collection).await.map_err(AppError::from)?;

    let subscription_id = Uuid::new_v4().to_string();
    let outbox = state.outbox.clone();
    let sid = subscription_id.clone();
    let handle = tokio::spawn(async move {
        loop {
            let records = snapshot_records(&rx.borrow_and_update());
            let event = json!({
                "event": "snapshot",
                "subscriptionId": sid,
                "collection": collection.name(),
                "records": records,
            });
            if outbox.send(event).is_err() || rx.changed().await.is_err() {
                break;
            }
        }
        debug!(subscription = %sid, "snapshot stream ended");
    });
    state.subscriptions.insert(subscription_id.clone(), handle);
    info!(subscription = %subscription_id, collection = collection.name(), "subscription started");
    Ok(json!({ "subscriptionId": subscription_id }))
}

fn cancel(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let id = required_str(&req.params, "subscriptionId")?;
    let Some(handle) = state.subscriptions.remove(&id) else {
        return Err(AppError::NotFound(format!("subscription {id} not found")).into());
    };
    handle.abort();
    info!(subscription = %id, "subscription cancelled");
    Ok(json!({ "cancelled": true }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "subscriptions.start" => Some(reply(&req.id, start(state, req).await)),
        "subscriptions.cancel" => Some(reply(&req.id, cancel(state, req))),
        _ => None,
    }
}
