//! Minimal object-storage client surface consumed by `ObjectStore`.
//! `MemoryObjectClient` backs tests; `FsObjectClient` maps keys onto a directory tree so
//! the binary has a durable backend without a cloud account.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};

pub type ObjectTags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub tags: ObjectTags,
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn put_object(&self, key: &str, data: Vec<u8>, tags: ObjectTags) -> StoreResult<()>;
    /// Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;
    async fn head_object(&self, key: &str) -> StoreResult<Option<ObjectMeta>>;
    /// Server-side copy, tags included. Missing source is `NotFound`.
    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()>;
    /// Objects whose key starts with `prefix`, ordered by key.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;
}

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    tags: ObjectTags,
}

impl StoredObject {
    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta { key: key.to_string(), size: self.data.len() as u64, last_modified: self.last_modified, tags: self.tags.clone() }
    }
}

#[derive(Default)]
pub struct MemoryObjectClient {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self { Self::default() }

    pub fn keys(&self) -> Vec<String> { self.objects.read().keys().cloned().collect() }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).map(|o| o.data.clone()))
    }

    async fn put_object(&self, key: &str, data: Vec<u8>, tags: ObjectTags) -> StoreResult<()> {
        self.objects.write().insert(key.to_string(), StoredObject { data, last_modified: Utc::now(), tags });
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        Ok(self.objects.read().get(key).map(|o| o.meta(key)))
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let mut copy = objects.get(src).cloned().ok_or_else(|| StoreError::NotFound(format!("object {src}")))?;
        copy.last_modified = Utc::now();
        objects.insert(dst.to_string(), copy);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let objects = self.objects.read();
        Ok(objects.range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, o)| o.meta(k)).collect())
    }
}

const OBJECTS_DIR: &str = "objects";
const TAGS_DIR: &str = "tags";
const TMP_MARKER: &str = ".tmp-";

/// Objects live under `<root>/objects/<key>`; tags as JSON under `<root>/tags/<key>.json`.
/// Writes go through a temp file and a rename.
pub struct FsObjectClient {
    root: PathBuf,
}

impl FsObjectClient {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(OBJECTS_DIR))?;
        std::fs::create_dir_all(root.join(TAGS_DIR))?;
        Ok(Self { root })
    }

    fn checked_key(key: &str) -> StoreResult<&str> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") || key.contains(TMP_MARKER) {
            return Err(StoreError::Internal(format!("invalid object key: {key}")));
        }
        Ok(key)
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(OBJECTS_DIR).join(Self::checked_key(key)?))
    }

    fn tags_path(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(TAGS_DIR).join(format!("{}.json", Self::checked_key(key)?)))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("object");
        let tmp = path.with_file_name(format!("{file_name}{TMP_MARKER}{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_tags(&self, key: &str) -> StoreResult<ObjectTags> {
        match tokio::fs::read(self.tags_path(key)?).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectTags::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_tags(&self, key: &str, tags: &ObjectTags) -> StoreResult<()> {
        let path = self.tags_path(key)?;
        if tags.is_empty() {
            return remove_if_exists(&path).await;
        }
        Self::write_atomic(&path, &serde_json::to_vec(tags)?).await
    }

    async fn meta_for(&self, key: &str, path: &Path) -> StoreResult<Option<ObjectMeta>> {
        let md = match tokio::fs::metadata(path).await {
            Ok(md) if md.is_file() => md,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let last_modified = md.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        Ok(Some(ObjectMeta { key: key.to_string(), size: md.len(), last_modified, tags: self.read_tags(key).await? }))
    }
}

async fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ObjectClient for FsObjectClient {
    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.object_path(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, key: &str, data: Vec<u8>, tags: ObjectTags) -> StoreResult<()> {
        Self::write_atomic(&self.object_path(key)?, &data).await?;
        self.write_tags(key, &tags).await
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        remove_if_exists(&self.object_path(key)?).await?;
        remove_if_exists(&self.tags_path(key)?).await
    }

    async fn head_object(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let path = self.object_path(key)?;
        self.meta_for(key, &path).await
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()> {
        let data = self.get_object(src).await?.ok_or_else(|| StoreError::NotFound(format!("object {src}")))?;
        let tags = self.read_tags(src).await?;
        self.put_object(dst, data, tags).await
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let base = self.root.join(OBJECTS_DIR);
        let wanted = prefix.to_string();
        let files = tokio::task::spawn_blocking(move || -> StoreResult<Vec<(String, PathBuf)>> {
            if !base.exists() {
                return Ok(Vec::new());
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(&base) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => continue,
                    Err(e) => return Err(StoreError::Internal(format!("walking {}: {e}", base.display()))),
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&base) else { continue };
                let key = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/");
                if key.contains(TMP_MARKER) || !key.starts_with(&wanted) {
                    continue;
                }
                files.push((key, entry.into_path()));
            }
            Ok(files)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("object listing task failed: {e}")))??;

        let mut out = Vec::with_capacity(files.len());
        for (key, path) in files {
            if let Some(meta) = self.meta_for(&key, &path).await? {
                out.push(meta);
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}
