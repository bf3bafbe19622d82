//! CMS signing of ticket requests.
//!
//! The authority's `loginCms` operation expects a CMS SignedData structure
//! that encapsulates the request document, DER encoded and then base64
//! encoded for transport. [`CmsSigner`] produces exactly that with OpenSSL's
//! PKCS#7 implementation.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use openssl::{
    pkcs7::{Pkcs7, Pkcs7Flags},
    pkey::PKey,
    stack::Stack,
    x509::X509,
};
use ticketbroker_storage::KeyMaterial;

use crate::error::{AuthError, Result};

/// Produces the transport encoding of a signed ticket request.
///
/// Key material is borrowed for the duration of one call and must not be
/// retained.
pub trait Signer: Send + Sync {
    /// Signs `document` with the tenant's key and certificate.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if the key or certificate is malformed
    /// or they do not belong together.
    fn sign(&self, document: &[u8], material: &KeyMaterial) -> Result<String>;
}

impl<S: Signer + ?Sized> Signer for Arc<S> {
    fn sign(&self, document: &[u8], material: &KeyMaterial) -> Result<String> {
        (**self).sign(document, material)
    }
}

/// PKCS#7 SignedData signer with the content attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmsSigner;

impl CmsSigner {
    /// Creates a signer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Signs and returns the DER encoding without base64.
    ///
    /// # Errors
    ///
    /// See [`Signer::sign`].
    pub fn sign_der(&self, document: &[u8], material: &KeyMaterial) -> Result<Vec<u8>> {
        let key = PKey::private_key_from_pem(&material.private_key)
            .map_err(|e| AuthError::signing_with_source("invalid private key", e))?;
        let cert = X509::from_pem(&material.certificate)
            .map_err(|e| AuthError::signing_with_source("invalid certificate", e))?;

        let cert_key = cert
            .public_key()
            .map_err(|e| AuthError::signing_with_source("certificate has no usable public key", e))?;
        if !cert_key.public_eq(&key) {
            return Err(AuthError::signing("certificate does not match private key"));
        }

        let chain = Stack::new().map_err(|e| AuthError::signing_with_source("allocating chain", e))?;
        let signed = Pkcs7::sign(&cert, &key, &chain, document, Pkcs7Flags::BINARY)
            .map_err(|e| AuthError::signing_with_source("PKCS#7 signing failed", e))?;
        signed.to_der().map_err(|e| AuthError::signing_with_source("DER encoding failed", e))
    }
}

impl Signer for CmsSigner {
    fn sign(&self, document: &[u8], material: &KeyMaterial) -> Result<String> {
        let der = self.sign_der(document, material)?;
        Ok(STANDARD.encode(der))
    }
}
