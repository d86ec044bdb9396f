use crate::shared::domain::errors::AppError;

/// Verify a provider webhook signature header of the form
/// `t=<unix>,v1=<hex hmac>` against the raw body, before any parsing.
/// The signed payload is `"{t}.{raw body}"` keyed with the webhook secret.
pub fn verify_webhook_signature(
    secret: &str,
    raw_body: &[u8],
    header: &str,
) -> Result<(), AppError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::AuthFailed("signature header missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(AppError::AuthFailed(
            "signature header missing v1 signature".to_string(),
        ));
    }

    let expected = compute_signature(secret, raw_body, timestamp);
    for candidate in signatures {
        if constant_time_eq(candidate.as_bytes(), expected.as_bytes()) {
            return Ok(());
        }
    }
    Err(AppError::AuthFailed("webhook signature mismatch".to_string()))
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`. Public so tests and tooling
/// can produce valid headers.
pub fn compute_signature(secret: &str, raw_body: &[u8], timestamp: &str) -> String {
    let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + raw_body.len());
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(raw_body);
    hex::encode(hmac_sha256::HMAC::mac(&signed_payload, secret.as_bytes()))
}

pub fn signature_header(secret: &str, raw_body: &[u8], timestamp: &str) -> String {
    format!("t={timestamp},v1={}", compute_signature(secret, raw_body, timestamp))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_testsecret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = signature_header(SECRET, BODY, "1712000000");
        assert!(verify_webhook_signature(SECRET, BODY, &header).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = signature_header(SECRET, BODY, "1712000000");
        let tampered = br#"{"id":"evt_1","type":"payment_intent.payment_failed"}"#;
        assert!(verify_webhook_signature(SECRET, tampered, &header).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = signature_header("whsec_other", BODY, "1712000000");
        assert!(verify_webhook_signature(SECRET, BODY, &header).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify_webhook_signature(SECRET, BODY, "v1=deadbeef").is_err());
        assert!(verify_webhook_signature(SECRET, BODY, "t=123").is_err());
        assert!(verify_webhook_signature(SECRET, BODY, "").is_err());
    }

    #[test]
    fn accepts_any_matching_v1_among_several() {
        let valid = compute_signature(SECRET, BODY, "1712000000");
        let header = format!("t=1712000000,v1=00000000,v1={valid}");
        assert!(verify_webhook_signature(SECRET, BODY, &header).is_ok());
    }
}
