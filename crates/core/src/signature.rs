use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the `sha256=<hex>` signature for a delivery.
///
/// The signed message is `message_id ‖ timestamp ‖ raw_body`, byte for byte.
pub fn sign(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    raw_body: &[u8],
) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(raw_body);
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a delivery signature in constant time.
///
/// Never fails loudly: missing headers, a malformed header or a mismatch all
/// yield `false`, and callers answer 401 without telling the cases apart.
pub fn verify(
    message_id: &str,
    timestamp: &str,
    raw_body: &[u8],
    provided: &str,
    secret: &[u8],
) -> bool {
    if message_id.is_empty() || timestamp.is_empty() || provided.is_empty() {
        return false;
    }

    match sign(secret, message_id, timestamp, raw_body) {
        Ok(expected) => expected.as_bytes().ct_eq(provided.as_bytes()).into(),
        Err(_) => false,
    }
}
