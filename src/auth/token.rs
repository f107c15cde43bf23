// ABOUTME: Signed bearer tokens binding a principal id and an expiry, verified with HMAC-SHA256.
// ABOUTME: Tokens are opaque to callers — only existence and lifetime are a contract.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{GatewayError, Result};

const TOKEN_PREFIX: &str = "coven_tk_";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generates a random 32-byte secret, suitable for first-run persistence.
    pub fn generate_secret() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn issue(&self, principal_id: &str, ttl: chrono::Duration) -> Result<(String, DateTime<Utc>)> {
        let expires_at = Utc::now() + ttl;
        let payload = format!("{principal_id}|{}", expires_at.to_rfc3339());
        let signature = self.sign(payload.as_bytes())?;

        let token = format!(
            "{TOKEN_PREFIX}{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature),
        );
        Ok((token, expires_at))
    }

    /// Verifies signature and expiry, returning the bound principal id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let body = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(GatewayError::Unauthenticated)?;
        let (payload_b64, sig_b64) = body.split_once('.').ok_or(GatewayError::Unauthenticated)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| GatewayError::Unauthenticated)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| GatewayError::Unauthenticated)?;

        let expected = self.sign(&payload)?;
        if expected.len() != signature.len() || !constant_time_eq(&expected, &signature) {
            return Err(GatewayError::Unauthenticated);
        }

        let payload = String::from_utf8(payload).map_err(|_| GatewayError::Unauthenticated)?;
        let (principal_id, expires_at) = payload
            .split_once('|')
            .ok_or(GatewayError::Unauthenticated)?;
        let expires_at = DateTime::parse_from_rfc3339(expires_at)
            .map_err(|_| GatewayError::Unauthenticated)?
            .with_timezone(&Utc);

        if Utc::now() > expires_at {
            return Err(GatewayError::Unauthenticated);
        }

        Ok(principal_id.to_string())
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::internal(e))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
