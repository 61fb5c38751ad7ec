use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded `HMAC-SHA256(secret, "{order_id}|{payment_id}")`, the value the
/// gateway signs a captured payment with.
pub fn payment_signature(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a gateway signature. The comparison is over the exact hex string, so
/// an upper-cased or otherwise re-encoded signature does not verify.
pub fn verify_payment_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let expected = payment_signature(secret, order_id, payment_id);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Byte comparison whose running time does not depend on where the inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "rzp_test_secret";

    #[test]
    fn signature_matches_reference_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn signature_covers_order_and_payment_with_separator() {
        let sig = payment_signature(SECRET, "order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_payment_signature(SECRET, "order_1", "pay_1", &sig));
        assert!(!verify_payment_signature(SECRET, "order_1|", "pay_1", &sig));
        assert!(!verify_payment_signature(SECRET, "order_1", "pay_2", &sig));
        assert!(!verify_payment_signature("other", "order_1", "pay_1", &sig));
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let sig = payment_signature(SECRET, "order_1", "pay_1");
        let bytes = sig.as_bytes();
        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut mutated = bytes.to_vec();
                mutated[i] ^= 1 << bit;
                assert!(!constant_time_eq(bytes, &mutated), "flip at {}:{}", i, bit);
            }
        }
    }

    #[test]
    fn comparison_is_case_and_length_sensitive() {
        let sig = payment_signature(SECRET, "order_1", "pay_1");
        assert!(!verify_payment_signature(SECRET, "order_1", "pay_1", &sig.to_uppercase()));
        assert!(!verify_payment_signature(SECRET, "order_1", "pay_1", &sig[..63]));
        assert!(!verify_payment_signature(SECRET, "order_1", "pay_1", ""));
    }

    #[test]
    fn comparison_function_agrees_with_equality() {
        let samples: [&[u8]; 5] = [b"", b"a", b"ab", b"ba", b"abc"];
        for a in samples {
            for b in samples {
                assert_eq!(constant_time_eq(a, b), a == b);
            }
        }
    }
}
