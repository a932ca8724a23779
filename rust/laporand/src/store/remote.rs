//! Cloud document-tree backend with a blob store for photos.
//!
//! Documents live at `<collection>/<key>`. Report keys are push ids
//! generated client-side; users are keyed by username. Live subscribers get
//! the whole collection after every mutation made through this store, and a
//! poll task picks up writes made by other clients.

use super::push_id::PushIdGenerator;
use super::{Backend, Collection, Document, PhotoUpload, Snapshot};
use crate::config::{BackendKind, RemoteConfig};
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// Raw access to the document tree and blob store.
#[async_trait]
pub trait DocumentTransport: Send + Sync + 'static {
    /// `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn write(&self, path: &str, doc: &Document) -> Result<(), StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Uploads a blob and returns its public download URL.
    async fn upload(
        &self,
        object_path: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError>;
}

/// Realtime Database REST dialect plus the Storage upload endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    database_url: String,
    storage_url: String,
    storage_bucket: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &RemoteConfig) -> Result<Self, StoreError> {
        Url::parse(&cfg.database_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database_url: {e}")))?;
        Url::parse(&cfg.storage_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid storage_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            database_url: cfg.database_url.trim_end_matches('/').to_string(),
            storage_url: cfg.storage_url.trim_end_matches('/').to_string(),
            storage_bucket: cfg.storage_bucket.clone(),
            auth_token: cfg.auth_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn node_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/{}.json", self.database_url, path))
            .map_err(|e| StoreError::Backend(format!("invalid document path {path:?}: {e}")))?;
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    fn object_base(&self) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.storage_url)
            .map_err(|e| StoreError::Backend(format!("invalid storage url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend("storage url cannot be a base".to_string()))?
            .extend(["b", self.storage_bucket.as_str(), "o"]);
        Ok(url)
    }

    fn auth_headers(&self) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StoreError::Backend(format!("invalid auth header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

fn http_err(e: reqwest::Error) -> StoreError {
    StoreError::Backend(format!("remote request failed: {e}"))
}

#[async_trait]
impl DocumentTransport for HttpTransport {
    #[instrument(name = "remote_read", skip(self))]
    async fn read(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let resp = self
            .client
            .get(self.node_url(path)?)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        let doc: Document = resp.json().await.map_err(http_err)?;
        Ok(if doc.is_null() { None } else { Some(doc) })
    }

    #[instrument(name = "remote_write", skip(self, doc))]
    async fn write(&self, path: &str, doc: &Document) -> Result<(), StoreError> {
        self.client
            .put(self.node_url(path)?)
            .json(doc)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        Ok(())
    }

    #[instrument(name = "remote_remove", skip(self))]
    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .delete(self.node_url(path)?)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        Ok(())
    }

    #[instrument(name = "remote_upload", skip(self, bytes), fields(len = bytes.len()))]
    async fn upload(
        &self,
        object_path: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError> {
        let mut upload_url = self.object_base()?;
        upload_url
            .query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object_path);
        let mut headers = self.auth_headers()?;
        let content_type = HeaderValue::from_str(mime_type)
            .map_err(|e| StoreError::Backend(format!("invalid mime type: {e}")))?;
        headers.insert(CONTENT_TYPE, content_type);

        let resp = self
            .client
            .post(upload_url)
            .headers(headers)
            .body(bytes)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        let meta: Document = resp.json().await.map_err(http_err)?;

        let mut download = self.object_base()?;
        download
            .path_segments_mut()
            .map_err(|_| StoreError::Backend("storage url cannot be a base".to_string()))?
            .push(object_path);
        download.query_pairs_mut().append_pair("alt", "media");
        if let Some(token) = meta
            .get("downloadTokens")
            .and_then(|v| v.as_str())
            .and_then(|s| s.split(',').next())
        {
            download.query_pairs_mut().append_pair("token", token);
        }
        Ok(download.to_string())
    }
}

type Feeds = HashMap<Collection, Arc<watch::Sender<Snapshot>>>;

pub struct RemoteStore {
    transport: Arc<dyn DocumentTransport>,
    push_ids: PushIdGenerator,
    feeds: Mutex<Feeds>,
    poll_interval: Duration,
}

impl RemoteStore {
    pub fn connect(cfg: &RemoteConfig) -> Result<Self, StoreError> {
        let transport = HttpTransport::new(cfg)?;
        info!(database = %cfg.database_url, "remote store configured");
        Ok(Self::with_transport(
            Arc::new(transport),
            Duration::from_millis(cfg.poll_interval_ms),
        ))
    }

    pub fn with_transport(transport: Arc<dyn DocumentTransport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            push_ids: PushIdGenerator::new(),
            feeds: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    /// Pushes a fresh snapshot to live subscribers of `collection`, if any.
    async fn publish(&self, collection: Collection) {
        let sender = self.feeds.lock().await.get(&collection).cloned();
        let Some(sender) = sender else {
            return;
        };
        if sender.is_closed() {
            return;
        }
        match read_snapshot(self.transport.as_ref(), collection).await {
            Ok(snapshot) => {
                sender.send_replace(snapshot);
            }
            Err(e) => warn!(collection = collection.name(), error = %e, "snapshot refresh failed"),
        }
    }
}

fn node_path(collection: Collection, key: &str) -> String {
    format!("{}/{}", collection.name(), key)
}

/// Longest key the document tree accepts, in bytes.
const MAX_KEY_BYTES: usize = 768;

/// True when `key` names exactly one child of a collection node. An empty
/// key or one containing `/` would address the collection or a grandchild.
fn is_node_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_BYTES
        && !key
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '.' | '#' | '$' | '[' | ']'))
}

fn invalid_key(collection: Collection, key: &str) -> StoreError {
    StoreError::InvalidKey {
        collection: collection.name(),
        key: key.to_string(),
    }
}

/// Reads a whole collection. Keys come back sorted, which for push ids is
/// insertion order.
async fn read_snapshot(
    transport: &dyn DocumentTransport,
    collection: Collection,
) -> Result<Snapshot, StoreError> {
    match transport.read(collection.name()).await? {
        None => Ok(Vec::new()),
        Some(Document::Object(map)) => {
            let mut entries: Snapshot = map.into_iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        }
        Some(other) => Err(StoreError::Corrupt {
            collection: collection.name(),
            key: String::new(),
            reason: format!("expected an object at the collection root, found {other}"),
        }),
    }
}

fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "photo".to_string()
    } else {
        cleaned
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Backend for RemoteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError> {
        if !is_node_key(key) {
            return Ok(None);
        }
        self.transport.read(&node_path(collection, key)).await
    }

    async fn list(&self, collection: Collection) -> Result<Snapshot, StoreError> {
        read_snapshot(self.transport.as_ref(), collection).await
    }

    async fn add(&self, collection: Collection, doc: Document) -> Result<String, StoreError> {
        let key = match collection.key_field() {
            Some(field) => {
                let key = doc
                    .get(field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_default();
                if !is_node_key(&key) {
                    return Err(invalid_key(collection, &key));
                }
                // Check-then-write: two clients racing on one username can
                // both pass this check.
                if self.transport.read(&node_path(collection, &key)).await?.is_some() {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.name(),
                        key,
                    });
                }
                key
            }
            None => self.push_ids.next(now_ms()),
        };
        self.transport
            .write(&node_path(collection, &key), &doc)
            .await?;
        self.publish(collection).await;
        Ok(key)
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        doc: Document,
    ) -> Result<(), StoreError> {
        if !is_node_key(key) {
            return Err(invalid_key(collection, key));
        }
        self.transport.write(&node_path(collection, key), &doc).await?;
        self.publish(collection).await;
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        if !is_node_key(key) {
            return Ok(());
        }
        self.transport.remove(&node_path(collection, key)).await?;
        self.publish(collection).await;
        Ok(())
    }

    async fn store_photo(
        &self,
        collection: Collection,
        photo: PhotoUpload,
        now_ms: i64,
    ) -> Result<String, StoreError> {
        let object_path = format!(
            "{}/{}_{}",
            collection.name(),
            now_ms,
            safe_file_name(&photo.file_name)
        );
        self.transport
            .upload(&object_path, &photo.mime_type, photo.bytes)
            .await
    }

    async fn subscribe(
        &self,
        collection: Collection,
    ) -> Result<watch::Receiver<Snapshot>, StoreError> {
        let initial = read_snapshot(self.transport.as_ref(), collection).await?;
        let mut feeds = self.feeds.lock().await;
        if let Some(sender) = feeds.get(&collection) {
            if !sender.is_closed() {
                sender.send_replace(initial);
                return Ok(sender.subscribe());
            }
        }

        let (tx, rx) = watch::channel(initial);
        let tx = Arc::new(tx);
        feeds.insert(collection, Arc::clone(&tx));
        drop(feeds);

        let transport = Arc::clone(&self.transport);
        let every = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match read_snapshot(transport.as_ref(), collection).await {
                    Ok(snapshot) => {
                        tx.send_if_modified(|current| {
                            if *current == snapshot {
                                false
                            } else {
                                *current = snapshot;
                                true
                            }
                        });
                    }
                    Err(e) => warn!(collection = collection.name(), error = %e, "poll failed"),
                }
            }
            debug!(collection = collection.name(), "live feed stopped");
        });
        info!(collection = collection.name(), "live feed started");
        Ok(rx)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::BTreeMap;

    /// In-process stand-in for the document tree and blob store.
    #[derive(Default)]
    pub struct MemoryTransport {
        pub tree: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
        pub blobs: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    }

    /// Trailing slashes address the parent node, as in the hosted tree.
    fn split(path: &str) -> (&str, Option<&str>) {
        match path.trim_end_matches('/').split_once('/') {
            Some((c, k)) => (c, Some(k)),
            None => (path, None),
        }
    }

    #[async_trait]
    impl DocumentTransport for MemoryTransport {
        async fn read(&self, path: &str) -> Result<Option<Document>, StoreError> {
            let tree = self.tree.lock().await;
            let (collection, key) = split(path);
            let Some(children) = tree.get(collection) else {
                return Ok(None);
            };
            Ok(match key {
                Some(k) => children.get(k).cloned(),
                None if children.is_empty() => None,
                None => Some(Document::Object(
                    children.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                )),
            })
        }

        async fn write(&self, path: &str, doc: &Document) -> Result<(), StoreError> {
            let (collection, key) = split(path);
            let Some(key) = key else {
                return Err(StoreError::Backend("refusing to overwrite a collection".into()));
            };
            self.tree
                .lock()
                .await
                .entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), doc.clone());
            Ok(())
        }

        async fn remove(&self, path: &str) -> Result<(), StoreError> {
            let (collection, key) = split(path);
            let mut tree = self.tree.lock().await;
            match key {
                Some(k) => {
                    if let Some(children) = tree.get_mut(collection) {
                        children.remove(k);
                    }
                }
                None => {
                    tree.remove(collection);
                }
            }
            Ok(())
        }

        async fn upload(
            &self,
            object_path: &str,
            mime_type: &str,
            bytes: Vec<u8>,
        ) -> Result<String, StoreError> {
            self.blobs
                .lock()
                .await
                .insert(object_path.to_string(), (mime_type.to_string(), bytes));
            Ok(format!("memory://blobs/{object_path}"))
        }
    }
}
