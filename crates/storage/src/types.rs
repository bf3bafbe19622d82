//! Common types used across storage operations.
//!
//! This module defines the tenant identity every per-tenant operation is
//! keyed by, and the kinds of documents kept for each tenant.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Number of digits in a tenant identifier.
pub const TENANT_ID_LEN: usize = 11;

/// A taxpayer identity (CUIT) used to namespace all per-tenant state.
///
/// Always exactly eleven ASCII digits. Construction validates the value, so
/// holding a `TenantId` is proof that it is safe to use as a path segment or
/// map key.
///
/// # Examples
///
/// ```
/// use ticketbroker_storage::TenantId;
///
/// let tenant: TenantId = "20304050607".parse().unwrap();
/// assert_eq!(tenant.as_str(), "20304050607");
/// assert!("2030405060".parse::<TenantId>().is_err());
/// assert!("2030405060x".parse::<TenantId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validates and wraps a tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTenant`] if the value is not exactly
    /// eleven ASCII digits.
    pub fn new(value: impl Into<String>) -> Result<Self, StorageError> {
        let value = value.into();
        if value.len() != TENANT_ID_LEN {
            return Err(StorageError::InvalidTenant { value, reason: "must be 11 digits long" });
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StorageError::InvalidTenant { value, reason: "must contain only digits" });
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the identifier as an integer, the form business calls embed.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        // Eleven digits always fit in a u64.
        self.0.bytes().fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
    }
}

impl FromStr for TenantId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of document kept per tenant.
///
/// Each tenant has at most one document of each kind; writes overwrite.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// The last ticket request generated for the tenant.
    Request,
    /// The last ticket response received for the tenant.
    Response,
}

impl DocumentKind {
    /// Both document kinds, in the order they are written during a renewal.
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Request, DocumentKind::Response];

    /// File name used by file-based stores.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Request => "loginTicketRequest.xml",
            DocumentKind::Response => "loginTicketResponse.xml",
        }
    }

    /// Short label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Request => "request",
            DocumentKind::Response => "response",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
