//! Request fingerprinting for logs and storage keys
//!
//! A fingerprint identifies a request's matchable content. It is never used
//! to decide a match (that is the matchers' job), only to name things.

use sha2::{Digest, Sha256};

use crate::model::Request;

/// Compute SHA-256 fingerprint of a request
///
/// The fingerprint includes:
/// 1. Method
/// 2. Scheme, host and port
/// 3. Path
/// 4. Query parameters (sorted)
/// 5. Headers (sorted, normalized)
/// 6. Body
#[must_use]
pub fn fingerprint_request(request: &Request) -> [u8; 32] {
    let mut hasher = Sha256::new();

    update_field(&mut hasher, request.method().as_bytes());

    update_field(&mut hasher, request.scheme().as_bytes());
    update_field(&mut hasher, request.host().as_bytes());
    hasher.update(request.port().unwrap_or(0).to_le_bytes());

    update_field(&mut hasher, request.path().as_bytes());

    for (key, value) in request.query() {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    let mut headers: Vec<(String, &[String])> = request
        .headers()
        .iter()
        .map(|(name, values)| (name.to_ascii_lowercase(), values))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, values) in headers {
        update_field(&mut hasher, name.as_bytes());
        for value in values {
            update_field(&mut hasher, value.trim().as_bytes());
        }
    }

    update_field(&mut hasher, request.body_bytes());

    hasher.finalize().into()
}

/// First eight bytes of a fingerprint as hex, for log lines and file names
#[must_use]
pub fn short_hex(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

/// Length-prefixed so that adjacent fields cannot run together
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> Request {
        Request::new("GET", "http://api.test/api/test").unwrap()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let hash1 = fingerprint_request(&test_request());
        let hash2 = fingerprint_request(&test_request());

        assert_eq!(hash1, hash2, "Fingerprint must be deterministic");
    }

    #[test]
    fn test_fingerprint_different_methods() {
        let get = test_request();
        let post = Request::new("POST", "http://api.test/api/test").unwrap();

        assert_ne!(
            fingerprint_request(&get),
            fingerprint_request(&post),
            "Different methods should produce different hashes"
        );
    }

    #[test]
    fn test_header_order_and_case_independence() {
        let req1 = test_request()
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/json");
        let req2 = test_request()
            .with_header("accept", "application/json")
            .with_header("content-type", "application/json");

        assert_eq!(fingerprint_request(&req1), fingerprint_request(&req2));
    }

    #[test]
    fn test_query_order_independence() {
        let req1 = Request::new("GET", "http://api.test/x?b=2&a=1").unwrap();
        let req2 = Request::new("GET", "http://api.test/x?a=1&b=2").unwrap();

        assert_eq!(fingerprint_request(&req1), fingerprint_request(&req2));
    }

    #[test]
    fn test_body_changes_fingerprint() {
        let req1 = test_request().with_body("a");
        let req2 = test_request().with_body("b");

        assert_ne!(fingerprint_request(&req1), fingerprint_request(&req2));
    }

    #[test]
    fn test_short_hex() {
        let hash = fingerprint_request(&test_request());
        let short = short_hex(&hash);

        assert_eq!(short.len(), 16);
        assert!(hex::encode(hash).starts_with(&short));
    }
}
