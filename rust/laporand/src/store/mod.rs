//! Persistence port shared by the embedded and remote backends.
//!
//! Backends speak untyped JSON documents; [`Store`] is the typed facade the
//! workflows use. A backend is chosen once at startup and never mixed.

pub mod local;
pub mod push_id;
pub mod remote;

use crate::config::{BackendKind, Config};
use crate::error::StoreError;
use crate::model::{Record, Stored};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

pub type Document = Value;

/// Full contents of a collection as `(key, document)` pairs.
pub type Snapshot = Vec<(String, Document)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    FacilityReports,
    DutyReports,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Users, Self::FacilityReports, Self::DutyReports];

    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::FacilityReports => "facilityReports",
            Self::DutyReports => "dutyReports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == s)
    }

    /// Document field that doubles as the unique key. `None` means the
    /// backend generates keys.
    pub fn key_field(self) -> Option<&'static str> {
        match self {
            Self::Users => Some("username"),
            Self::FacilityReports | Self::DutyReports => None,
        }
    }
}

/// Photo bytes as received from a submitter.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError>;

    /// Insertion order where the backend can provide it.
    async fn list(&self, collection: Collection) -> Result<Snapshot, StoreError>;

    /// Inserts a new document and returns its key. Keyed collections fail
    /// with [`StoreError::DuplicateKey`] when the key is taken.
    async fn add(&self, collection: Collection, doc: Document) -> Result<String, StoreError>;

    /// Upsert; overwrites silently.
    async fn put(&self, collection: Collection, key: &str, doc: Document)
        -> Result<(), StoreError>;

    /// Removing an absent key is a no-op.
    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError>;

    /// Turns photo bytes into the reference stored on the report.
    async fn store_photo(
        &self,
        collection: Collection,
        photo: PhotoUpload,
        now_ms: i64,
    ) -> Result<String, StoreError>;

    /// Live full-snapshot feed. Dropping the receiver cancels it.
    async fn subscribe(
        &self,
        _collection: Collection,
    ) -> Result<watch::Receiver<Snapshot>, StoreError> {
        Err(StoreError::Unsupported(self.kind().as_str()))
    }
}

/// Typed handle over the selected backend. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Opens the backend named by `config`. The local backend needs a
    /// workspace directory.
    pub fn open(config: &Config, workspace: Option<&Path>) -> Result<Self, StoreError> {
        match config.backend {
            BackendKind::Local => {
                let Some(ws) = workspace else {
                    return Err(StoreError::Unavailable(
                        "no workspace selected".to_string(),
                    ));
                };
                Ok(Self::new(Arc::new(local::LocalStore::open(ws)?)))
            }
            BackendKind::Remote => Ok(Self::new(Arc::new(remote::RemoteStore::connect(
                &config.remote,
            )?))),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn get<T: Record>(&self, key: &str) -> Result<Option<Stored<T>>, StoreError> {
        let collection = T::COLLECTION;
        match self.backend.get(collection, key).await? {
            Some(doc) => decode::<T>(key, doc).map(Some),
            None => Ok(None),
        }
    }

    /// Documents that fail to decode are skipped with a warning so one bad
    /// row cannot hide the rest of the collection.
    pub async fn list<T: Record>(&self) -> Result<Vec<Stored<T>>, StoreError> {
        let collection = T::COLLECTION;
        let snapshot = self.backend.list(collection).await?;
        let mut out = Vec::with_capacity(snapshot.len());
        for (key, doc) in snapshot {
            match decode::<T>(&key, doc) {
                Ok(stored) => out.push(stored),
                Err(e) => warn!(collection = collection.name(), key = %key, error = %e, "skipping record"),
            }
        }
        Ok(out)
    }

    pub async fn add<T: Record>(&self, record: &T) -> Result<String, StoreError> {
        self.backend.add(T::COLLECTION, encode(record)?).await
    }

    pub async fn put<T: Record>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        self.backend.put(T::COLLECTION, key, encode(record)?).await
    }

    pub async fn delete<T: Record>(&self, key: &str) -> Result<(), StoreError> {
        self.backend.delete(T::COLLECTION, key).await
    }

    /// Number of records `list` would return.
    pub async fn count<T: Record>(&self) -> Result<usize, StoreError> {
        Ok(self.list::<T>().await?.len())
    }

    pub async fn store_photo(
        &self,
        collection: Collection,
        photo: PhotoUpload,
        now_ms: i64,
    ) -> Result<String, StoreError> {
        self.backend.store_photo(collection, photo, now_ms).await
    }

    pub async fn subscribe(
        &self,
        collection: Collection,
    ) -> Result<watch::Receiver<Snapshot>, StoreError> {
        self.backend.subscribe(collection).await
    }
}

fn encode<T: Record>(record: &T) -> Result<Document, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode<T: Record>(key: &str, doc: Document) -> Result<Stored<T>, StoreError> {
    serde_json::from_value::<T>(doc)
        .map(|record| Stored {
            id: key.to_string(),
            record,
        })
        .map_err(|e| StoreError::Corrupt {
            collection: T::COLLECTION.name(),
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Renders a snapshot as documents with their key injected as `id`.
pub fn snapshot_records(snapshot: &Snapshot) -> Vec<Document> {
    snapshot
        .iter()
        .map(|(key, doc)| {
            let mut doc = doc.clone();
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("id".to_string(), Value::String(key.clone()));
            }
            doc
        })
        .collect()
}
