//! Payment gateway adapters.
//!
//! Each adapter builds the provider's signed request and verifies its callbacks. The
//! canonical strings are exposed so they can be checked against fixed sample vectors.

pub mod momo;
pub mod vietqr;
pub mod vnpay;

pub use momo::{MomoCreateResponse, MomoGateway, MomoIpn, MomoPaymentRequest};
pub use vietqr::{VietQrGateway, VietQrRequest};
pub use vnpay::{VnpayCallback, VnpayGateway, VnpayPaymentRequest};

use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("malformed gateway payload: {0}")]
    Malformed(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ProviderError(err.to_string())
    }
}

/// Signed outbound artifact handed to the payer
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub signature: String,
}

pub(crate) fn hmac_sha256_hex(secret: &str, data: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn hmac_sha512_hex(secret: &str, data: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compares two signatures without short-circuiting on the first differing byte
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_requires_identical_bytes() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"abc", b"abc1"));
    }

    #[test]
    fn gateway_errors_surface_as_provider_errors() {
        let err: ServiceError = GatewayError::Rejected {
            code: 1006,
            message: "declined".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::ProviderError(msg) if msg.contains("1006")));
    }
}
