//! Student submissions. Everything is validated before the photo is stored
//! or a record is written, so a rejected form leaves no trace.

use crate::error::AppError;
use crate::model::{DutyReport, FacilityReport, Priority, ReportStatus, Stored, User};
use crate::store::{Collection, PhotoUpload, Store};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local, NaiveDate};
use serde::Deserialize;
use tracing::info;

/// Category values that ask for a free-text category instead.
const OTHER_CATEGORY: [&str; 2] = ["other", "lainnya"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PhotoPayload {
    pub file_name: String,
    pub mime_type: String,
    /// Plain base64, or a full `data:` URL.
    pub data_base64: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FacilityForm {
    pub location: String,
    pub category: String,
    pub custom_category: Option<String>,
    pub priority: Option<String>,
    pub description: String,
    pub photo: Option<PhotoPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DutyForm {
    /// `YYYY-MM-DD`; today when absent or blank.
    pub date: Option<String>,
    pub photo: Option<PhotoPayload>,
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

pub fn decode_photo(photo: Option<&PhotoPayload>, max_bytes: usize) -> Result<PhotoUpload, AppError> {
    let Some(photo) = photo else {
        return Err(AppError::validation("photo is required"));
    };
    let mime = photo.mime_type.trim().to_ascii_lowercase();
    if !mime.starts_with("image/") {
        return Err(AppError::validation("photo must be an image"));
    }
    let data = photo.data_base64.trim();
    let data = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    // Reject before decoding when the encoded length alone is over the limit.
    if data.len() / 4 * 3 > max_bytes + 3 {
        return Err(AppError::validation(format!(
            "photo exceeds {max_bytes} bytes"
        )));
    }
    let bytes = STANDARD
        .decode(data)
        .map_err(|_| AppError::validation("photo is not valid base64"))?;
    if bytes.is_empty() {
        return Err(AppError::validation("photo is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::validation(format!(
            "photo exceeds {max_bytes} bytes"
        )));
    }
    Ok(PhotoUpload {
        file_name: photo.file_name.trim().to_string(),
        mime_type: mime,
        bytes,
    })
}

fn resolve_category(form: &FacilityForm) -> Result<String, AppError> {
    let category = required("category", &form.category)?;
    if OTHER_CATEGORY
        .iter()
        .any(|o| category.eq_ignore_ascii_case(o))
    {
        let custom = form.custom_category.as_deref().unwrap_or_default();
        if custom.trim().is_empty() {
            return Err(AppError::validation(
                "customCategory is required when category is other",
            ));
        }
        return Ok(custom.trim().to_string());
    }
    Ok(category)
}

/// Files a facility report for `submitter`. Identity fields come from the
/// session, never from the form.
pub async fn submit_facility(
    store: &Store,
    submitter: &User,
    form: FacilityForm,
    max_photo_bytes: usize,
    now: DateTime<Local>,
) -> Result<Stored<FacilityReport>, AppError> {
    let location = required("location", &form.location)?;
    let category = resolve_category(&form)?;
    let priority = match form.priority.as_deref().map(str::trim) {
        None | Some("") => Priority::default(),
        Some(p) => Priority::parse(p)
            .ok_or_else(|| AppError::validation(format!("unknown priority {p:?}")))?,
    };
    let description = required("description", &form.description)?;
    let upload = decode_photo(form.photo.as_ref(), max_photo_bytes)?;

    let photo = store
        .store_photo(Collection::FacilityReports, upload, now.timestamp_millis())
        .await?;
    let report = FacilityReport {
        submitter_name: submitter.name.clone(),
        submitter_username: submitter.username.clone(),
        class_name: submitter.class_name.clone(),
        location,
        category,
        priority,
        description,
        photo,
        status: ReportStatus::New,
        date: now.date_naive(),
        timestamp: Some(now.timestamp_millis()),
    };
    let id = store.add(&report).await?;
    info!(id = %id, username = %submitter.username, class = %report.class_name, "facility report filed");
    Ok(Stored { id, record: report })
}

pub fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("date must be YYYY-MM-DD, got {s:?}")))
}

/// Files a duty attendance proof. Repeat submissions for the same class and
/// day are accepted.
pub async fn submit_duty(
    store: &Store,
    submitter: &User,
    form: DutyForm,
    max_photo_bytes: usize,
    now: DateTime<Local>,
) -> Result<Stored<DutyReport>, AppError> {
    let date = match form.date.as_deref().map(str::trim) {
        None | Some("") => now.date_naive(),
        Some(d) => parse_date(d)?,
    };
    let upload = decode_photo(form.photo.as_ref(), max_photo_bytes)?;

    let photo = store
        .store_photo(Collection::DutyReports, upload, now.timestamp_millis())
        .await?;
    let report = DutyReport {
        submitter_name: submitter.name.clone(),
        submitter_username: submitter.username.clone(),
        class_name: submitter.class_name.clone(),
        date,
        photo,
        time: now.format("%H:%M:%S").to_string(),
        timestamp: Some(now.timestamp_millis()),
    };
    let id = store.add(&report).await?;
    info!(id = %id, class = %report.class_name, date = %date, "duty report filed");
    Ok(Stored { id, record: report })
}
