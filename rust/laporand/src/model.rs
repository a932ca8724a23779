use crate::store::Collection;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed document that lives in exactly one collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;
}

/// Triage state of a facility report. Any state may be set from any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    New,
    InProgress,
    Done,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 3] = [Self::New, Self::InProgress, Self::Done];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "new" => Some(Self::New),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Student identity record, keyed by `username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;
}

/// Outward view of a [`User`]; never carries password material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub username: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub phone: Option<String>,
    pub student_id: Option<String>,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            name: u.name.clone(),
            class_name: u.class_name.clone(),
            phone: u.phone.clone(),
            student_id: u.student_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FacilityReport {
    pub submitter_name: String,
    pub submitter_username: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub location: String,
    pub category: String,
    pub priority: Priority,
    pub description: String,
    pub photo: String,
    pub status: ReportStatus,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Record for FacilityReport {
    const COLLECTION: Collection = Collection::FacilityReports;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DutyReport {
    pub submitter_name: String,
    pub submitter_username: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub date: NaiveDate,
    pub photo: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Record for DutyReport {
    const COLLECTION: Collection = Collection::DutyReports;
}

/// A record together with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<T> {
    pub id: String,
    #[serde(flatten)]
    pub record: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_labels_round_trip_through_parse() {
        for s in ReportStatus::ALL {
            assert_eq!(ReportStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ReportStatus::parse("closed"), None);
    }

    #[test]
    fn unknown_fields_are_rejected_at_the_boundary() {
        let doc = json!({
            "submitterName": "Ani",
            "submitterUsername": "ani",
            "class": "X TKJ 1",
            "date": "2024-03-01",
            "photo": "data:image/png;base64,AA==",
            "time": "07:00:00",
            "mood": "sleepy"
        });
        assert!(serde_json::from_value::<DutyReport>(doc).is_err());
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let doc = json!({
            "username": "ani",
            "name": "Ani",
            "class": "X TKJ 1"
        });
        assert!(serde_json::from_value::<User>(doc).is_err());
    }

    #[test]
    fn stored_record_flattens_id_into_the_document() {
        let stored = Stored {
            id: "7".to_string(),
            record: DutyReport {
                submitter_name: "Ani".into(),
                submitter_username: "ani".into(),
                class_name: "X TKJ 1".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                photo: "p".into(),
                time: "07:00:00".into(),
                timestamp: None,
            },
        };
        let v = serde_json::to_value(&stored).unwrap();
        assert_eq!(v["id"], "7");
        assert_eq!(v["class"], "X TKJ 1");
        assert_eq!(v["date"], "2024-03-01");
        assert!(v.get("timestamp").is_none());
    }
}
