//! Tamper-evident payment signatures.
//!
//! Every payment row stores an HMAC-SHA256 over (reference, amount, payer
//! phone) keyed with a server-side secret. Confirmation recomputes the HMAC
//! from the confirming caller's claimed values; a mismatch means the SMS
//! receipt the admin is looking at does not belong to this record.

use bigdecimal::BigDecimal;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical decimal rendering so `300`, `300.0` and `300.00` sign the same.
pub fn canonical_amount(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

/// Compute the hex-encoded signature for a payment.
pub fn sign(secret: &str, reference: &str, amount: &BigDecimal, payer_phone: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(reference.as_bytes());
    mac.update(b"|");
    mac.update(canonical_amount(amount).as_bytes());
    mac.update(b"|");
    mac.update(payer_phone.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a stored signature against recomputed inputs.
pub fn verify(
    secret: &str,
    reference: &str,
    amount: &BigDecimal,
    payer_phone: &str,
    expected_hex: &str,
) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(reference.as_bytes());
    mac.update(b"|");
    mac.update(canonical_amount(amount).as_bytes());
    mac.update(b"|");
    mac.update(payer_phone.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SECRET: &str = "test-signing-secret";

    #[test]
    fn sign_and_verify_round_trip() {
        let amount = BigDecimal::from(300);
        let sig = sign(SECRET, "doctor-abc123", &amount, "677123456");
        assert_eq!(sig.len(), 64);
        assert!(verify(SECRET, "doctor-abc123", &amount, "677123456", &sig));
    }

    #[test]
    fn amount_scale_does_not_change_signature() {
        let plain = BigDecimal::from(300);
        let scaled = BigDecimal::from_str("300.00").unwrap();
        assert_eq!(
            sign(SECRET, "ref", &plain, "677123456"),
            sign(SECRET, "ref", &scaled, "677123456")
        );
    }

    #[test]
    fn tampered_amount_fails() {
        let sig = sign(SECRET, "ref", &BigDecimal::from(300), "677123456");
        assert!(!verify(SECRET, "ref", &BigDecimal::from(600), "677123456", &sig));
    }

    #[test]
    fn tampered_phone_fails() {
        let sig = sign(SECRET, "ref", &BigDecimal::from(300), "677123456");
        assert!(!verify(SECRET, "ref", &BigDecimal::from(300), "699000000", &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign(SECRET, "ref", &BigDecimal::from(300), "677123456");
        assert!(!verify("other-secret", "ref", &BigDecimal::from(300), "677123456", &sig));
    }

    #[test]
    fn malformed_hex_is_rejected_not_panicking() {
        assert!(!verify(SECRET, "ref", &BigDecimal::from(300), "677123456", "not-hex"));
    }
}
