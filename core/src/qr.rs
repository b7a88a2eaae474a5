//! Signed QR payloads for minted tickets.
//!
//! Format: `v1.<claims>.<mac>` where `claims` is the URL-safe base64 of the
//! JSON [`TicketClaims`] and `mac` is HMAC-SHA256 over `v1.<claims>`.

use crate::error::{AllocError, Result};
use crate::types::{OrderId, TicketId, TierId};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v1";

/// Claims embedded in a ticket's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Ticket id
    #[serde(rename = "tid")]
    pub ticket_id: TicketId,
    /// Order id
    #[serde(rename = "oid")]
    pub order_id: OrderId,
    /// Tier
    pub tier: TierId,
    /// Unit number for numbered tiers
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit: Option<u32>,
    /// Issue time, seconds since the Unix epoch
    pub iat: i64,
}

/// Signs and verifies QR payloads with a shared secret.
#[derive(Clone)]
pub struct QrSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for QrSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrSigner").finish_non_exhaustive()
    }
}

impl QrSigner {
    /// Create a signer.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] if the secret is shorter than
    /// 16 bytes.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let key = secret.as_ref().to_vec();
        if key.len() < 16 {
            return Err(AllocError::ValidationError(
                "QR signing secret must be at least 16 bytes".into(),
            ));
        }
        Ok(Self { key })
    }

    /// Produce the signed payload for `claims`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] if the claims cannot be encoded.
    pub fn sign(&self, claims: &TicketClaims) -> Result<String> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| AllocError::ValidationError(format!("Unencodable ticket claims: {e}")))?;
        let body = format!("{VERSION}.{}", URL_SAFE_NO_PAD.encode(json));
        let mac = self.mac(body.as_bytes())?.finalize().into_bytes();
        Ok(format!("{body}.{}", URL_SAFE_NO_PAD.encode(mac)))
    }

    /// Check a payload's signature and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ValidationError`] if the payload is malformed or
    /// the signature does not match.
    pub fn verify(&self, payload: &str) -> Result<TicketClaims> {
        let invalid = || AllocError::ValidationError("Invalid ticket signature".into());

        let (body, signature) = payload.rsplit_once('.').ok_or_else(invalid)?;
        let encoded_claims = body
            .strip_prefix(VERSION)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(invalid)?;

        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        self.mac(body.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;

        let json = URL_SAFE_NO_PAD.decode(encoded_claims).map_err(|_| invalid())?;
        serde_json::from_slice(&json).map_err(|_| invalid())
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AllocError::ValidationError(format!("Invalid signing key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn claims() -> TicketClaims {
        TicketClaims {
            ticket_id: TicketId::new(),
            order_id: OrderId::new(),
            tier: TierId::new("lottery"),
            unit: Some(42),
            iat: 1_735_689_600,
        }
    }

    #[test]
    fn test_signed_payload_verifies() {
        let signer = QrSigner::new("a-very-secret-signing-key").unwrap();
        let claims = claims();
        let payload = signer.sign(&claims).unwrap();

        assert!(payload.starts_with("v1."));
        assert_eq!(signer.verify(&payload).unwrap(), claims);
    }

    #[test]
    fn test_tampered_or_foreign_payload_is_rejected() {
        let signer = QrSigner::new("a-very-secret-signing-key").unwrap();
        let other = QrSigner::new("another-secret-signing-key").unwrap();
        let payload = signer.sign(&claims()).unwrap();

        assert!(other.verify(&payload).is_err());

        let mut forged = claims();
        forged.unit = Some(43);
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let signature = payload.rsplit_once('.').unwrap().1;
        assert!(signer.verify(&format!("v1.{forged_body}.{signature}")).is_err());

        assert!(signer.verify("garbage").is_err());
    }

    #[test]
    fn test_short_secret_is_rejected() {
        assert!(QrSigner::new("short").is_err());
    }
}
