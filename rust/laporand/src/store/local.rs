use super::{Backend, Collection, Document, PhotoUpload, Snapshot};
use crate::config::BackendKind;
use crate::db;
use crate::error::StoreError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Embedded SQLite backend. One connection per process, shared by every
/// workflow; writes to the same key race with last-write-wins.
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    pub fn open(workspace: &Path) -> Result<Self, StoreError> {
        let conn = db::open_db(workspace)
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
        info!(workspace = %workspace.display(), "local store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        db::init_schema(&conn).map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool so SQLite never stalls the event loop.
    async fn with_conn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("local database lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("local database task failed: {e}")))?
    }
}

fn table(collection: Collection) -> &'static str {
    match collection {
        Collection::Users => "users",
        Collection::FacilityReports => "facility_reports",
        Collection::DutyReports => "duty_reports",
    }
}

fn key_column(collection: Collection) -> &'static str {
    match collection.key_field() {
        Some(_) => "username",
        None => "id",
    }
}

/// SQL value for `key`, or `None` when the key cannot exist in `collection`.
/// Report ids must be in the form `list` returns them: `"01"` is not row 1.
fn sql_key(collection: Collection, key: &str) -> Option<SqlValue> {
    match collection.key_field() {
        Some(_) => Some(SqlValue::Text(key.to_string())),
        None => key
            .parse::<i64>()
            .ok()
            .filter(|n| n.to_string() == key)
            .map(SqlValue::Integer),
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

fn encode_doc(doc: &Document) -> Result<String, StoreError> {
    serde_json::to_string(doc).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode_doc(collection: Collection, key: &str, raw: &str) -> Result<Document, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        collection: collection.name(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn doc_key(collection: Collection, field: &str, doc: &Document) -> Result<String, StoreError> {
    doc.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StoreError::InvalidKey {
            collection: collection.name(),
            key: String::new(),
        })
}

#[async_trait]
impl Backend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError> {
        let Some(k) = sql_key(collection, key) else {
            return Ok(None);
        };
        let key = key.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT doc FROM {} WHERE {} = ?",
                table(collection),
                key_column(collection)
            );
            let raw: Option<String> = conn
                .query_row(&sql, [k], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            raw.map(|raw| decode_doc(collection, &key, &raw)).transpose()
        })
        .await
    }

    async fn list(&self, collection: Collection) -> Result<Snapshot, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT CAST({} AS TEXT), doc FROM {} ORDER BY rowid",
                key_column(collection),
                table(collection)
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_err)?;
            rows.into_iter()
                .map(|(key, raw)| {
                    let doc = decode_doc(collection, &key, &raw)?;
                    Ok((key, doc))
                })
                .collect()
        })
        .await
    }

    async fn add(&self, collection: Collection, doc: Document) -> Result<String, StoreError> {
        let raw = encode_doc(&doc)?;
        match collection.key_field() {
            Some(field) => {
                let key = doc_key(collection, field, &doc)?;
                self.with_conn(move |conn| {
                    let sql = format!(
                        "INSERT INTO {}({}, doc) VALUES(?, ?)",
                        table(collection),
                        key_column(collection)
                    );
                    let inserted = conn.execute(&sql, (&key, &raw));
                    match inserted {
                        Ok(_) => Ok(key),
                        Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateKey {
                            collection: collection.name(),
                            key,
                        }),
                        Err(e) => Err(db_err(e)),
                    }
                })
                .await
            }
            None => {
                self.with_conn(move |conn| {
                    let sql = format!("INSERT INTO {}(doc) VALUES(?)", table(collection));
                    conn.execute(&sql, [&raw]).map_err(db_err)?;
                    Ok(conn.last_insert_rowid().to_string())
                })
                .await
            }
        }
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        doc: Document,
    ) -> Result<(), StoreError> {
        let Some(k) = sql_key(collection, key) else {
            return Err(StoreError::InvalidKey {
                collection: collection.name(),
                key: key.to_string(),
            });
        };
        let raw = encode_doc(&doc)?;
        self.with_conn(move |conn| {
            let col = key_column(collection);
            let sql = format!(
                "INSERT INTO {t}({c}, doc) VALUES(?, ?)
                 ON CONFLICT({c}) DO UPDATE SET doc = excluded.doc",
                t = table(collection),
                c = col
            );
            conn.execute(&sql, (k, &raw)).map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        let Some(k) = sql_key(collection, key) else {
            return Ok(());
        };
        self.with_conn(move |conn| {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                table(collection),
                key_column(collection)
            );
            conn.execute(&sql, [k]).map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn store_photo(
        &self,
        _collection: Collection,
        photo: PhotoUpload,
        _now_ms: i64,
    ) -> Result<String, StoreError> {
        Ok(format!(
            "data:{};base64,{}",
            photo.mime_type,
            STANDARD.encode(&photo.bytes)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn report_keys_are_assigned_in_insertion_order() {
        let store = LocalStore::open_in_memory().expect("open");
        let a = store
            .add(Collection::DutyReports, json!({ "n": 1 }))
            .await
            .expect("add a");
        let b = store
            .add(Collection::DutyReports, json!({ "n": 2 }))
            .await
            .expect("add b");
        assert_eq!(a, "1");
        assert_eq!(b, "2");

        let all = store.list(Collection::DutyReports).await.expect("list");
        let keys: Vec<&str> = all.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn keyed_add_rejects_duplicates_and_keeps_the_original() {
        let store = LocalStore::open_in_memory().expect("open");
        store
            .add(Collection::Users, json!({ "username": "ani", "v": 1 }))
            .await
            .expect("first");
        let err = store
            .add(Collection::Users, json!({ "username": "ani", "v": 2 }))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        let doc = store
            .get(Collection::Users, "ani")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(doc["v"], 1);
    }

    #[tokio::test]
    async fn keyed_add_requires_the_key_field() {
        let store = LocalStore::open_in_memory().expect("open");
        let err = store
            .add(Collection::Users, json!({ "name": "nobody" }))
            .await
            .expect_err("missing key");
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn put_overwrites_and_delete_of_absent_key_is_a_noop() {
        let store = LocalStore::open_in_memory().expect("open");
        let id = store
            .add(Collection::FacilityReports, json!({ "status": "new" }))
            .await
            .expect("add");
        store
            .put(Collection::FacilityReports, &id, json!({ "status": "done" }))
            .await
            .expect("put");
        let doc = store
            .get(Collection::FacilityReports, &id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(doc["status"], "done");

        store
            .delete(Collection::FacilityReports, "999")
            .await
            .expect("absent delete");
        store
            .delete(Collection::FacilityReports, "not-a-number")
            .await
            .expect("unaddressable delete");
        assert_eq!(
            store
                .list(Collection::FacilityReports)
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn non_numeric_report_keys_are_absent() {
        let store = LocalStore::open_in_memory().expect("open");
        let got = store
            .get(Collection::FacilityReports, "-Nxyz")
            .await
            .expect("get");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn report_ids_only_match_their_listed_form() {
        let store = LocalStore::open_in_memory().expect("open");
        let id = store
            .add(Collection::FacilityReports, json!({ "status": "new" }))
            .await
            .expect("add");
        assert_eq!(id, "1");
        for alias in ["01", "+1", " 1", "1 "] {
            assert!(
                store
                    .get(Collection::FacilityReports, alias)
                    .await
                    .expect("get")
                    .is_none(),
                "{alias:?} resolved to a row"
            );
            assert!(matches!(
                store
                    .put(Collection::FacilityReports, alias, json!({ "status": "done" }))
                    .await,
                Err(StoreError::InvalidKey { .. })
            ));
            store
                .delete(Collection::FacilityReports, alias)
                .await
                .expect("noop");
        }
        let doc = store
            .get(Collection::FacilityReports, "1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(doc["status"], "new");
    }

    #[tokio::test]
    async fn photos_become_inline_data_urls() {
        let store = LocalStore::open_in_memory().expect("open");
        let url = store
            .store_photo(
                Collection::DutyReports,
                PhotoUpload {
                    file_name: "bukti.png".into(),
                    mime_type: "image/png".into(),
                    bytes: b"hello".to_vec(),
                },
                0,
            )
            .await
            .expect("photo");
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
    }

    #[tokio::test]
    async fn local_backend_has_no_live_feed() {
        let store = LocalStore::open_in_memory().expect("open");
        let err = store
            .subscribe(Collection::FacilityReports)
            .await
            .expect_err("unsupported");
        assert!(matches!(err, StoreError::Unsupported("local")));
    }

    #[tokio::test]
    async fn data_survives_reopening_the_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = LocalStore::open(dir.path()).expect("open");
            store
                .add(Collection::Users, json!({ "username": "budi" }))
                .await
                .expect("add");
            assert!(dir.path().join(db::DB_FILE).is_file());
        }
        let store = LocalStore::open(dir.path()).expect("reopen");
        assert!(store
            .get(Collection::Users, "budi")
            .await
            .expect("get")
            .is_some());
    }
}
