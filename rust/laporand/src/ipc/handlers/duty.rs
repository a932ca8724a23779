use crate::error::AppError;
use crate::ipc::helpers::{optional_str, parse_params, reply, require_admin, require_student, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::DutyReport;
use crate::workflow::query::{self, DutySort};
use crate::workflow::submit::{self, DutyForm};
use crate::workflow::triage;
use chrono::Local;
use serde_json::{json, Value};

async fn submit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let user = require_student(state)?;
    let form: DutyForm = parse_params(&req.params)?;
    let store = store(state)?;
    let saved =
        submit::submit_duty(&store, &user, form, state.config.max_photo_bytes, Local::now())
            .await?;
    Ok(json!({ "report": saved }))
}

async fn mine(state: &mut AppState) -> Result<Value, HandlerErr> {
    let user = require_student(state)?;
    let store = store(state)?;
    let reports: Vec<_> = store
        .list::<DutyReport>()
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
        Some(s) => Some(DutySort::parse(s).ok_or_else(|| {
            HandlerErr::bad_params(format!("sortBy must be name or date, got {s:?}"))
        })?),
    };
    let store = store(state)?;
    let all = store.list::<DutyReport>().await.map_err(AppError::from)?;
    Ok(json!({ "reports": query::view(&all, q.as_deref(), sort) }))
}

/// Today's (or the given day's) coverage over the configured roster.
async fn coverage(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let day = match optional_str(&req.params, "date")?.as_deref() {
        None | Some("") => Local::now().date_naive(),
        Some(d) => submit::parse_date(d)?,
    };
    let store = store(state)?;
    let all = store.list::<DutyReport>().await.map_err(AppError::from)?;
    let classes = triage::daily_coverage(all.iter().map(|s| &s.record), &state.config.roster, day);
    let covered = classes.iter().filter(|c| c.covered).count();
    Ok(json!({
        "date": day,
        "classes": classes,
        "covered": covered,
        "total": classes.len(),
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "duty.submit" => submit(state, req).await,
        "duty.mine" => mine(state).await,
        "duty.list" => list(state, req).await,
        "duty.coverage" => coverage(state, req).await,
        _ => return None,
    };
    Some(reply(&req.id, resp))
}
