use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use callsim_core::storage::{Order, Page, Storage, document_id};
use callsim_core::StorageError;
use serde_json::Value;
use tokio::fs;

/// A [`Storage`] that keeps one JSON file per document, under one
/// directory per container.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crashed write never leaves a truncated document behind.
#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Creates a storage rooted at `root`. Directories are created lazily.
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(checked_name(container)?))
    }
}

/// Rejects names that would escape their directory.
fn checked_name(name: &str) -> Result<&str, StorageError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(name)
    } else {
        Err(StorageError::Backend(format!("invalid name `{name}`")))
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn upsert(&self, container: &str, doc: Value) -> Result<(), StorageError> {
        let id = checked_name(document_id(&doc)?)?;
        let dir = self.container_dir(container)?;
        fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(&doc)?;
        let path = dir.join(format!("{id}.json"));
        let tmp_path = dir.join(format!(".{id}.json.tmp"));
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &path).await?;
        trace!("wrote {}", path.display());
        Ok(())
    }

    async fn get(&self, container: &str, id: &str) -> Result<Value, StorageError> {
        let path = self
            .container_dir(container)?
            .join(format!("{}.json", checked_name(id)?));
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(
        &self,
        container: &str,
        page: Page,
        order: &Order,
    ) -> Result<Vec<Value>, StorageError> {
        let dir = self.container_dir(container)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut docs = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            match serde_json::from_slice(&bytes) {
                Ok(doc) => docs.push(doc),
                Err(err) => warn!("skipping unreadable document {name}: {err}"),
            }
        }
        Ok(order.paginate(docs, page))
    }
}
