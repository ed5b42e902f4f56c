//! Request signing for the BingX API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::common::errors::{ClientError, Result};
use crate::config::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on every signed request
pub const API_KEY_HEADER: &str = "X-BX-APIKEY";

/// Opaque signing scheme applied to every authenticated request
///
/// The REST client only knows it needs a signature over a canonical payload;
/// how that signature is produced is up to the implementation.
pub trait RequestSigner: Send + Sync {
    /// API key sent alongside the signature
    fn api_key(&self) -> &str;

    /// Sign the canonical payload
    fn sign(&self, payload: &str) -> Result<String>;
}

/// Output encoding of an HMAC signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Lowercase hex (BingX)
    Hex,
    /// Standard base64 (Coinbase/OKX style venues)
    Base64,
}

/// HMAC-SHA256 signer holding the process credentials
pub struct HmacSigner {
    credentials: Credentials,
    encoding: SignatureEncoding,
}

impl HmacSigner {
    pub fn new(credentials: Credentials, encoding: SignatureEncoding) -> Self {
        Self {
            credentials,
            encoding,
        }
    }

    /// Signer using the BingX scheme
    pub fn bingx(credentials: Credentials) -> Self {
        Self::new(credentials, SignatureEncoding::Hex)
    }
}

impl RequestSigner for HmacSigner {
    fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret().as_bytes())
            .map_err(|e| ClientError::Authentication(format!("Failed to create HMAC: {}", e)))?;
        mac.update(payload.as_bytes());
        let digest = mac.finalize().into_bytes();

        Ok(match self.encoding {
            SignatureEncoding::Hex => hex::encode(digest),
            SignatureEncoding::Base64 => BASE64.encode(digest),
        })
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("credentials", &self.credentials)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Canonical BingX payload: parameters sorted by key, joined as `k=v&k=v`
///
/// Values are signed unencoded; the same string is later sent as the query.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
