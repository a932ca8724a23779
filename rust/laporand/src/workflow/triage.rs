use crate::error::AppError;
use crate::model::{DutyReport, FacilityReport, ReportStatus, Stored, User};
use crate::store::Store;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: usize,
    pub done: usize,
    pub distinct_classes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusHistogram {
    pub new: usize,
    pub in_progress: usize,
    pub done: usize,
}

pub fn report_stats(reports: &[Stored<FacilityReport>]) -> ReportStats {
    let classes: HashSet<&str> = reports
        .iter()
        .map(|r| r.record.class_name.as_str())
        .collect();
    ReportStats {
        total: reports.len(),
        done: reports
            .iter()
            .filter(|r| r.record.status == ReportStatus::Done)
            .count(),
        distinct_classes: classes.len(),
    }
}

pub fn status_histogram(reports: &[Stored<FacilityReport>]) -> StatusHistogram {
    let mut h = StatusHistogram::default();
    for r in reports {
        match r.record.status {
            ReportStatus::New => h.new += 1,
            ReportStatus::InProgress => h.in_progress += 1,
            ReportStatus::Done => h.done += 1,
        }
    }
    h
}

/// Outcome of a triage action with the aggregates recomputed afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub report: Stored<FacilityReport>,
    pub previous: ReportStatus,
    pub changed: bool,
    pub stats: ReportStats,
    pub histogram: StatusHistogram,
}

/// Sets the status of one facility report. Any status may follow any other;
/// re-selecting the current one writes nothing.
pub async fn set_status(
    store: &Store,
    id: &str,
    status: ReportStatus,
) -> Result<StatusChange, AppError> {
    let Some(mut stored) = store.get::<FacilityReport>(id).await? else {
        return Err(AppError::NotFound(format!("facility report {id} not found")));
    };
    let previous = stored.record.status;
    let changed = previous != status;
    if changed {
        stored.record.status = status;
        store.put(id, &stored.record).await?;
        info!(id = %id, from = previous.as_str(), to = status.as_str(), "report status changed");
    }
    let all = store.list::<FacilityReport>().await?;
    Ok(StatusChange {
        report: stored,
        previous,
        changed,
        stats: report_stats(&all),
        histogram: status_histogram(&all),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub facility: ReportStats,
    pub histogram: StatusHistogram,
    pub duty_total: usize,
    pub user_total: usize,
}

pub async fn dashboard(store: &Store) -> Result<DashboardStats, AppError> {
    let facility = store.list::<FacilityReport>().await?;
    Ok(DashboardStats {
        facility: report_stats(&facility),
        histogram: status_histogram(&facility),
        duty_total: store.count::<DutyReport>().await?,
        user_total: store.count::<User>().await?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCoverage {
    pub class: String,
    pub covered: bool,
}

/// One entry per roster class, in roster order: covered when at least one
/// duty report for that class is dated `day`.
pub fn daily_coverage<'a, I>(reports: I, roster: &[String], day: NaiveDate) -> Vec<ClassCoverage>
where
    I: IntoIterator<Item = &'a DutyReport>,
{
    let seen: HashSet<&str> = reports
        .into_iter()
        .filter(|r| r.date == day)
        .map(|r| r.class_name.as_str())
        .collect();
    roster
        .iter()
        .map(|class| ClassCoverage {
            class: class.clone(),
            covered: seen.contains(class.as_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use crate::store::local::LocalStore;
    use crate::store::remote::memory::MemoryTransport;
    use crate::store::remote::RemoteStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn facility(class: &str, status: ReportStatus) -> FacilityReport {
        FacilityReport {
            submitter_name: "Ani".into(),
            submitter_username: "ani".into(),
            class_name: class.into(),
            location: "Lab Komputer".into(),
            category: "Kursi".into(),
            priority: Priority::Medium,
            description: "patah".into(),
            photo: "p".into(),
            status,
            date: day(1),
            timestamp: Some(1),
        }
    }

    fn duty(class: &str, date: NaiveDate) -> DutyReport {
        DutyReport {
            submitter_name: "Ani".into(),
            submitter_username: "ani".into(),
            class_name: class.into(),
            date,
            photo: "p".into(),
            time: "07:00:00".into(),
            timestamp: None,
        }
    }

    fn roster() -> Vec<String> {
        crate::config::DEFAULT_ROSTER
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[tokio::test]
    async fn set_status_rewrites_only_the_status() {
        let store = Store::new(Arc::new(LocalStore::open_in_memory().expect("open")));
        let id = store
            .add(&facility("X TKJ 1", ReportStatus::New))
            .await
            .expect("add");
        store
            .add(&facility("X TKJ 2", ReportStatus::Done))
            .await
            .expect("add");

        let change = set_status(&store, &id, ReportStatus::Done)
            .await
            .expect("set");
        assert!(change.changed);
        assert_eq!(change.previous, ReportStatus::New);
        assert_eq!(
            change.stats,
            ReportStats {
                total: 2,
                done: 2,
                distinct_classes: 2
            }
        );
        assert_eq!(change.histogram.done, 2);
        let after_first = store
            .get::<FacilityReport>(&id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(
            after_first.record,
            facility("X TKJ 1", ReportStatus::Done)
        );

        let again = set_status(&store, &id, ReportStatus::Done)
            .await
            .expect("set again");
        assert!(!again.changed);
        let after_second = store
            .get::<FacilityReport>(&id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn backward_transitions_are_allowed() {
        let store = Store::new(Arc::new(LocalStore::open_in_memory().expect("open")));
        let id = store
            .add(&facility("X TKJ 1", ReportStatus::Done))
            .await
            .expect("add");
        let change = set_status(&store, &id, ReportStatus::New)
            .await
            .expect("reopen");
        assert_eq!(change.report.record.status, ReportStatus::New);
    }

    #[tokio::test]
    async fn unknown_report_is_not_found() {
        let store = Store::new(Arc::new(LocalStore::open_in_memory().expect("open")));
        assert!(matches!(
            set_status(&store, "999", ReportStatus::Done).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            set_status(&store, "bukan-angka", ReportStatus::Done).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            set_status(&store, "", ReportStatus::Done).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn non_canonical_ids_are_not_found() {
        let store = Store::new(Arc::new(LocalStore::open_in_memory().expect("open")));
        let id = store
            .add(&facility("X TKJ 1", ReportStatus::New))
            .await
            .expect("add");
        assert_eq!(id, "1");
        assert!(matches!(
            set_status(&store, "01", ReportStatus::Done).await,
            Err(AppError::NotFound(_))
        ));
        let listed = store.list::<FacilityReport>().await.expect("list");
        assert_eq!(listed[0].record.status, ReportStatus::New);
    }

    #[tokio::test]
    async fn remote_store_treats_blank_ids_like_the_local_one() {
        let remote = RemoteStore::with_transport(
            Arc::new(MemoryTransport::default()),
            Duration::from_secs(60),
        );
        let store = Store::new(Arc::new(remote));
        store
            .add(&facility("X TKJ 1", ReportStatus::New))
            .await
            .expect("add");
        for id in ["", "a/b", "a.b"] {
            assert!(matches!(
                set_status(&store, id, ReportStatus::Done).await,
                Err(AppError::NotFound(_))
            ));
        }
        let listed = store.list::<FacilityReport>().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].record.status, ReportStatus::New);
    }

    #[test]
    fn coverage_is_membership_not_count() {
        let reports = vec![
            duty("X TKJ 1", day(1)),
            duty("X TKJ 1", day(1)),
            duty("XI TKJ 2", day(2)),
        ];
        let cov = daily_coverage(&reports, &roster(), day(1));
        assert_eq!(cov.len(), 9);
        assert_eq!(cov[0], ClassCoverage { class: "X TKJ 1".into(), covered: true });
        assert_eq!(cov.iter().filter(|c| c.covered).count(), 1);
        assert!(!cov.iter().find(|c| c.class == "XI TKJ 2").unwrap().covered);
    }

    #[test]
    fn unknown_classes_do_not_appear_in_coverage() {
        let reports = vec![duty("Guru", day(1))];
        let cov = daily_coverage(&reports, &roster(), day(1));
        assert!(cov.iter().all(|c| !c.covered));
        assert!(cov.iter().all(|c| c.class != "Guru"));
    }
}
