//! Filesystem-backed ticket store.
//!
//! [`FileTicketStore`] keeps each tenant's documents in its own directory:
//!
//! ```text
//! {documents_root}/{tenant}/loginTicketRequest.xml
//! {documents_root}/{tenant}/loginTicketResponse.xml
//! ```
//!
//! Writes go to a temporary sibling file that is then renamed over the
//! target, so readers never observe a partially written document.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use fail::fail_point;
use tokio::io::AsyncWriteExt;

use crate::{
    config::FileStoreConfig,
    error::{StorageError, StorageResult},
    store::{TicketStore, resource_name},
    ticket::Document,
    types::{DocumentKind, TenantId},
};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Ticket store persisting documents as XML files.
#[derive(Debug, Clone)]
pub struct FileTicketStore {
    root: PathBuf,
}

impl FileTicketStore {
    /// Creates a store rooted at `root`. The directory is created on the
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store using the document directory of `config`.
    #[must_use]
    pub fn from_config(config: &FileStoreConfig) -> Self {
        Self::new(config.documents_root())
    }

    /// Root directory holding the per-tenant subdirectories.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `tenant`'s documents.
    #[must_use]
    pub fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    /// Path of one of `tenant`'s documents.
    #[must_use]
    pub fn document_path(&self, tenant: &TenantId, kind: DocumentKind) -> PathBuf {
        self.tenant_dir(tenant).join(kind.file_name())
    }
}

/// Permission bits for private key files.
pub(crate) const OWNER_ONLY: u32 = 0o600;

/// Writes `bytes` to `target` through a temporary sibling file and a rename.
///
/// The parent directory must already exist.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> StorageResult<()> {
    write_atomic_with_mode(target, bytes, None).await
}

/// Like [`write_atomic`], but on unix the temporary file is created with
/// `mode` before any byte is written, so the content never exists on disk
/// with wider permissions.
pub(crate) async fn write_atomic_with_mode(
    target: &Path,
    bytes: &[u8],
    mode: Option<u32>,
) -> StorageResult<()> {
    let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("document");
    let temp = target.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_new(&temp, bytes, mode).await {
        let _cleanup = tokio::fs::remove_file(&temp).await;
        return Err(StorageError::io_with_source(format!("writing {}", temp.display()), e));
    }
    if let Err(e) = tokio::fs::rename(&temp, target).await {
        let _cleanup = tokio::fs::remove_file(&temp).await;
        return Err(StorageError::io_with_source(format!("replacing {}", target.display()), e));
    }
    Ok(())
}

async fn write_new(path: &Path, bytes: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if let Some(mode) = mode {
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[async_trait]
impl TicketStore for FileTicketStore {
    #[tracing::instrument(skip(self), fields(tenant = %tenant))]
    async fn exists(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<bool> {
        let path = self.document_path(tenant, kind);
        tokio::fs::try_exists(&path).await.map_err(|e| {
            StorageError::io_with_source(format!("checking {}", path.display()), e)
        })
    }

    #[tracing::instrument(skip(self), fields(tenant = %tenant))]
    async fn read(&self, tenant: &TenantId, kind: DocumentKind) -> StorageResult<Document> {
        let path = self.document_path(tenant, kind);
        let resource = resource_name(tenant, kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(resource));
            },
            Err(e) => {
                return Err(StorageError::io_with_source(format!("reading {}", path.display()), e));
            },
        };
        let xml = String::from_utf8(bytes)
            .map_err(|e| StorageError::corrupt_with_source(resource.as_str(), "not UTF-8", e))?;
        Document::parse(kind, &xml, &resource)
    }

    #[tracing::instrument(skip(self, document), fields(tenant = %tenant, kind = %document.kind()))]
    async fn write(&self, tenant: &TenantId, document: &Document) -> StorageResult<()> {
        fail_point!("ticket-store-write", |_| {
            Err(StorageError::io("injected failure at ticket-store-write"))
        });

        let dir = self.tenant_dir(tenant);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::io_with_source(format!("creating {}", dir.display()), e)
        })?;

        let xml = document.to_xml()?;
        let target = dir.join(document.kind().file_name());
        write_atomic(&target, xml.as_bytes()).await?;

        tracing::debug!(path = %target.display(), "document written");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_all(&self, tenant: &TenantId) -> StorageResult<()> {
        let dir = self.tenant_dir(tenant);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io_with_source(format!("removing {}", dir.display()), e)),
        }
    }
}
