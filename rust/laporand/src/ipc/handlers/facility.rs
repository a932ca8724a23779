use crate::error::AppError;
use crate::ipc::helpers::{
    optional_str, parse_params, reply, require_admin, require_student, required_str, store,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{FacilityReport, ReportStatus};
use crate::workflow::query::{self, FacilitySort};
use crate::workflow::submit::{self, FacilityForm};
use crate::workflow::triage;
use chrono::Local;
use serde_json::{json, Value};

async fn submit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let user = require_student(state)?;
    let form: FacilityForm = parse_params(&req.params)?;
    let store = store(state)?;
    let saved = submit::submit_facility(
        &store,
        &user,
        form,
        state.config.max_photo_bytes,
        Local::now(),
    )
    .await?;
    Ok(json!({ "report": saved }))
}

async fn mine(state: &mut AppState) -> Result<Value, HandlerErr> {
    let user = require_student(state)?;
    let store = store(state)?;
    let reports: Vec<_> = store
        .list::<FacilityReport>()
        .await
        .map_err(AppError::from)?
        .into_iter()
        .filter(|r| r.record.submitter_username == user.username)
        .collect();
    Ok(json!({ "reports": reports }))
}

async fn list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let q = optional_str(&req.params, "query")?;
    let sort = match optional_str(&req.params, "sortBy")?.as_deref() {
        None | Some("") => None,
        Some(s) => Some(FacilitySort::parse(s).ok_or_else(|| {
            HandlerErr::bad_params(format!("sortBy must be name, date or status, got {s:?}"))
        })?),
    };
    let store = store(state)?;
    let all = store
        .list::<FacilityReport>()
        .await
        .map_err(AppError::from)?;
    let reports = query::view(&all, q.as_deref(), sort);
    Ok(json!({
        "reports": reports,
        "stats": triage::report_stats(&all),
    }))
}

async fn set_status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let id = required_str(&req.params, "id")?;
    let raw = required_str(&req.params, "status")?;
    let status = ReportStatus::parse(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("unknown status {raw:?}"),
        details: Some(json!({ "allowed": ReportStatus::ALL.map(ReportStatus::as_str) })),
    })?;
    let store = store(state)?;
    let change = triage::set_status(&store, &id, status).await?;
    serde_json::to_value(change).map_err(|e| AppError::Storage(e.to_string()).into())
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "facility.submit" => submit(state, req).await,
        "facility.mine" => mine(state).await,
        "facility.list" => list(state, req).await,
        "facility.setStatus" => set_status(state, req).await,
        _ => return None,
    };
    Some(reply(&req.id, resp))
}
