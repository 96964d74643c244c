//! Shared access signature tokens

use crate::error::{BridgeError, BridgeResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime used when connecting
pub fn default_token_ttl() -> Duration {
    Duration::hours(24)
}

/// Sign `resource_uri` with the base64 `key`, valid until `expiry`
pub fn generate_sas_token(
    resource_uri: &str,
    key: &str,
    expiry: DateTime<Utc>,
) -> BridgeResult<String> {
    let key = STANDARD.decode(key.trim()).map_err(|e| {
        BridgeError::InvalidConnectionString(format!("SharedAccessKey is not base64: {}", e))
    })?;

    let encoded_uri = urlencoding::encode(resource_uri);
    let expiry = expiry.timestamp();
    let to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| BridgeError::InvalidConnectionString(e.to_string()))?;
    mac.update(to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry
    ))
}
