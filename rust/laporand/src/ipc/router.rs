use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub async fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::facility::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::duty::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::stats::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::subscriptions::try_handle(state, &req).await {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
