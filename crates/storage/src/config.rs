//! Configuration for the file-backed stores.
//!
//! [`FileStoreConfig`] places ticket documents and key material under a
//! single root directory:
//!
//! ```text
//! {root}/
//! ├── xml_management/app_xml_files/{tenant}/
//! │   ├── loginTicketRequest.xml
//! │   └── loginTicketResponse.xml
//! └── app_certs/{tenant}/
//!     ├── PrivateKey.key
//!     └── returned_certificate.pem
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for [`FileTicketStore`](crate::FileTicketStore) and
/// [`FileKeyMaterialProvider`](crate::FileKeyMaterialProvider).
///
/// # Example
///
/// ```
/// use ticketbroker_storage::FileStoreConfig;
///
/// let config = FileStoreConfig::builder().root("/var/lib/ticketbroker").build();
/// assert!(config.validate().is_ok());
/// assert!(config.documents_root().ends_with("xml_management/app_xml_files"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct FileStoreConfig {
    /// Base directory for all per-tenant state.
    #[builder(into)]
    pub root: PathBuf,

    /// Ticket document directory, relative to `root`.
    #[serde(default = "default_documents_dir")]
    #[builder(into, default = default_documents_dir())]
    pub documents_dir: PathBuf,

    /// Key material directory, relative to `root`.
    #[serde(default = "default_certs_dir")]
    #[builder(into, default = default_certs_dir())]
    pub certs_dir: PathBuf,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("xml_management/app_xml_files")
}

fn default_certs_dir() -> PathBuf {
    PathBuf::from("app_certs")
}

impl FileStoreConfig {
    /// Directory holding one subdirectory of ticket documents per tenant.
    #[must_use]
    pub fn documents_root(&self) -> PathBuf {
        self.root.join(&self.documents_dir)
    }

    /// Directory holding one subdirectory of key material per tenant.
    #[must_use]
    pub fn certs_root(&self) -> PathBuf {
        self.root.join(&self.certs_dir)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the root is empty or the document and key
    /// directories overlap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Empty { field: "root" });
        }
        let documents = self.documents_root();
        let certs = self.certs_root();
        if overlaps(&documents, &certs) {
            return Err(ConfigError::Invalid {
                field: "certs_dir",
                reason: "must not overlap documents_dir".to_owned(),
            });
        }
        Ok(())
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
