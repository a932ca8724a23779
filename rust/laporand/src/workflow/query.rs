//! Pure filtering and ordering over report lists. Nothing here mutates its
//! input; every call recomputes from scratch.

use crate::model::{DutyReport, FacilityReport, Stored};
use std::cmp::Ordering;

/// Text fields a free-text query is matched against.
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;

    /// `needle` must already be lowercased.
    fn matches(&self, needle: &str) -> bool {
        self.search_fields()
            .iter()
            .any(|f| f.to_lowercase().contains(needle))
    }
}

impl Searchable for FacilityReport {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.submitter_name.as_str(),
            self.class_name.as_str(),
            self.location.as_str(),
        ]
    }
}

impl Searchable for DutyReport {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.submitter_name.as_str(), self.class_name.as_str()]
    }
}

pub trait SortOrder<T>: Copy {
    fn compare(self, a: &T, b: &T) -> Ordering;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitySort {
    Name,
    Date,
    Status,
}

impl FacilitySort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "date" => Some(Self::Date),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutySort {
    Name,
    Date,
}

impl DutySort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

/// Case-insensitive, then byte order so distinct names never compare equal.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

impl SortOrder<FacilityReport> for FacilitySort {
    fn compare(self, a: &FacilityReport, b: &FacilityReport) -> Ordering {
        match self {
            Self::Name => compare_names(&a.submitter_name, &b.submitter_name),
            Self::Date => a.date.cmp(&b.date),
            Self::Status => a.status.as_str().cmp(b.status.as_str()),
        }
    }
}

impl SortOrder<DutyReport> for DutySort {
    fn compare(self, a: &DutyReport, b: &DutyReport) -> Ordering {
        match self {
            Self::Name => compare_names(&a.submitter_name, &b.submitter_name),
            Self::Date => a.date.cmp(&b.date),
        }
    }
}

/// Filters by `query` and orders by `sort`. Ties and an absent sort key
/// keep input order.
pub fn view<T, K>(records: &[Stored<T>], query: Option<&str>, sort: Option<K>) -> Vec<Stored<T>>
where
    T: Searchable + Clone,
    K: SortOrder<T>,
{
    let needle = query.unwrap_or_default().to_lowercase();
    let mut out: Vec<Stored<T>> = records
        .iter()
        .filter(|r| needle.is_empty() || r.record.matches(&needle))
        .cloned()
        .collect();
    if let Some(key) = sort {
        out.sort_by(|a, b| key.compare(&a.record, &b.record));
    }
    out
}
