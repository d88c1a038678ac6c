use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::{
    error::{ColdStoreError, ColdStoreResult},
    traits::{Blob, BlobMetadata, ColdStore, ObjectInfo},
};
use crate::{
    config::FilesystemArchiveConfig,
    models::{Page, PageRequest, decode_key_cursor, encode_key_cursor},
};

const META_SUFFIX: &str = ".meta.json";
const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem cold store.
///
/// Each object is stored at `{path}/{key}` with its metadata in a sidecar
/// file `{path}/{key}.meta.json`. `created_at` is the payload file's
/// modification time.
pub struct FilesystemColdStore {
    config: FilesystemArchiveConfig,
}

impl FilesystemColdStore {
    pub fn new(config: FilesystemArchiveConfig) -> ColdStoreResult<Self> {
        let store = Self { config };

        if store.config.create_dir {
            let path = Path::new(&store.config.path);
            if !path.exists() {
                info!(path = %store.config.path, "Creating archive directory");
                std::fs::create_dir_all(path)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(store.config.dir_mode),
                    )?;
                }
            }
        }

        Ok(store)
    }

    fn root(&self) -> &Path {
        Path::new(&self.config.path)
    }

    fn object_path(&self, key: &str) -> ColdStoreResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root().to_path_buf(), |p, s| p.join(s)))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> ColdStoreResult<()> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_path);

        tokio::fs::write(&temp_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &temp_path,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn create_parent(&self, path: &Path) -> ColdStoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.config.dir_mode);
        builder.create(parent).await?;
        Ok(())
    }

    /// Walk the tree below `dir` in key order, returning up to `limit + 1`
    /// objects whose keys start with `prefix` and sort after `after`.
    ///
    /// Subtrees whose keys all sort at or before `after` are never read.
    async fn collect_page(
        &self,
        dir: PathBuf,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> ColdStoreResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let Some(dir_key) = self.key_for(&dir) else {
            return Ok(objects);
        };
        let mut pending = vec![WalkEntry::Dir(dir, dir_key)];

        while let Some(entry) = pending.pop() {
            match entry {
                WalkEntry::File(path, key) => {
                    let metadata = match tokio::fs::metadata(&path).await {
                        Ok(metadata) => metadata,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    };
                    objects.push(ObjectInfo {
                        key,
                        created_at: modified_at(&metadata)?,
                        size: metadata.len(),
                    });
                    if objects.len() > limit {
                        break;
                    }
                }
                WalkEntry::Dir(path, key) => {
                    let children = self.read_children(&path, &key, prefix, after).await?;
                    // Reversed so the smallest key is popped first.
                    pending.extend(children.into_iter().rev());
                }
            }
        }

        Ok(objects)
    }

    /// Children of one directory that can hold keys in range, sorted by key.
    async fn read_children(
        &self,
        dir: &Path,
        dir_key: &str,
        prefix: &str,
        after: Option<&str>,
    ) -> ColdStoreResult<Vec<WalkEntry>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let key = if dir_key.is_empty() {
                name
            } else {
                format!("{dir_key}/{name}")
            };

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                let subtree = format!("{key}/");
                let overlaps_prefix =
                    subtree.starts_with(prefix) || prefix.starts_with(subtree.as_str());
                let entirely_before = after
                    .is_some_and(|a| a > subtree.as_str() && !a.starts_with(subtree.as_str()));
                if overlaps_prefix && !entirely_before {
                    children.push(WalkEntry::Dir(entry.path(), key));
                }
            } else if file_type.is_file()
                && !is_auxiliary(&key)
                && key.starts_with(prefix)
                && after.is_none_or(|a| key.as_str() > a)
            {
                children.push(WalkEntry::File(entry.path(), key));
            }
        }

        children.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(children)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.root()).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(segments?.join("/"))
    }
}

enum WalkEntry {
    Dir(PathBuf, String),
    File(PathBuf, String),
}

impl WalkEntry {
    /// Directories sort as `{key}/`, which places them exactly where their
    /// descendants' keys fall among their siblings.
    fn sort_key(&self) -> std::borrow::Cow<'_, str> {
        match self {
            WalkEntry::Dir(_, key) => format!("{key}/").into(),
            WalkEntry::File(_, key) => key.as_str().into(),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(META_SUFFIX);
    PathBuf::from(sidecar)
}

fn is_auxiliary(key: &str) -> bool {
    key.ends_with(META_SUFFIX) || key.ends_with(TEMP_SUFFIX)
}

fn validate_key(key: &str) -> ColdStoreResult<()> {
    let valid = !key.is_empty()
        && !is_auxiliary(key)
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(ColdStoreError::InvalidKey(key.to_string()))
    }
}

fn modified_at(metadata: &std::fs::Metadata) -> ColdStoreResult<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

#[async_trait]
impl ColdStore for FilesystemColdStore {
    #[instrument(skip(self, payload, metadata), fields(size = payload.len()))]
    async fn write_blob(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> ColdStoreResult<()> {
        let path = self.object_path(key)?;
        debug!(key, path = %path.display(), "Writing archive blob to filesystem");

        self.create_parent(&path).await?;

        let pairs: BTreeMap<String, String> = metadata.to_pairs().into_iter().collect();
        self.write_file(&sidecar_path(&path), &serde_json::to_vec(&pairs)?)
            .await?;
        self.write_file(&path, &payload).await?;

        debug!(key, "Archive blob stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_blob(&self, key: &str) -> ColdStoreResult<Option<Blob>> {
        let path = self.object_path(key)?;

        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let created_at = modified_at(&tokio::fs::metadata(&path).await?)?;

        let metadata = match tokio::fs::read(sidecar_path(&path)).await {
            Ok(raw) => serde_json::from_slice::<BTreeMap<String, String>>(&raw)
                .ok()
                .and_then(|pairs| {
                    BlobMetadata::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if metadata.is_none() {
            warn!(key, "Archive blob has no readable metadata");
        }

        Ok(Some(Blob {
            key: key.to_string(),
            payload,
            metadata,
            created_at,
        }))
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        prefix: &str,
        page: PageRequest,
    ) -> ColdStoreResult<Page<ObjectInfo>> {
        // Start the walk at the deepest directory the prefix fully names.
        let dir = match prefix.rfind('/') {
            Some(idx) => prefix[..idx]
                .split('/')
                .filter(|s| !s.is_empty())
                .fold(self.root().to_path_buf(), |p, s| p.join(s)),
            None => self.root().to_path_buf(),
        };

        let after = page.cursor.as_deref().and_then(decode_key_cursor);
        let limit = page.limit.max(1);
        let mut objects = self
            .collect_page(dir, prefix, after.as_deref(), limit)
            .await?;

        let next_cursor = if objects.len() > limit {
            objects.truncate(limit);
            objects.last().map(|info| encode_key_cursor(&info.key))
        } else {
            None
        };
        Ok(Page {
            items: objects,
            next_cursor,
        })
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, key: &str) -> ColdStoreResult<()> {
        let path = self.object_path(key)?;
        debug!(key, path = %path.display(), "Deleting archive blob from filesystem");

        for target in [path.clone(), sidecar_path(&path)] {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
