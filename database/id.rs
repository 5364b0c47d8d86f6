use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use sha3::{Digest, Sha3_256};

/// Generate an opaque, 22-character job id.
///
/// The id is a base64 URL-safe (no padding) encoding of a 16-byte digest over the
/// queue name, a monotonic high-resolution timestamp, and the job's identifying
/// content (class name, encoded data, scheduled run time) plus a random nonce. This
/// is enough uniqueness to avoid coordinated id assignment across producers without
/// giving the id any structural meaning beyond identity.
pub fn generate_job_id(queue: &str, class: &str, data: &[u8], run_at_millis: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut hasher = Sha3_256::new();
    hasher.update(queue.as_bytes());
    hasher.update(now.as_nanos().to_le_bytes());
    hasher.update(class.as_bytes());
    hasher.update(data);
    hasher.update(run_at_millis.to_le_bytes());
    hasher.update(nonce);
    let digest = hasher.finalize();

    encode_id_bytes(&digest[..16])
}

/// Encode 16 raw bytes into the 22-character job id alphabet (base64 URL-safe,
/// unpadded).
pub fn encode_id_bytes(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_22_chars() {
        let id = generate_job_id("default", "Echo", b"{}", 0);
        assert_eq!(id.len(), 22);
    }

    #[test]
    fn ids_are_unique() {
        let a = generate_job_id("default", "Echo", b"{}", 0);
        let b = generate_job_id("default", "Echo", b"{}", 0);
        assert_ne!(a, b);
    }
}
