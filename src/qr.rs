//! Ticket codes printed on the QR image.
//!
//! Format: `PREFIX-<16 hex>-<4 HEX>`. The 16-hex body is derived from the
//! ticket id and a random salt, so re-issuing a ticket yields a new code.
//! The trailing checksum is keyed with the gate secret, so a scanner can
//! reject forged or mistyped codes without a database round trip.

use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const BODY_LEN: usize = 16;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct QrGenerator {
    prefix: String,
    secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrError {
    #[error("malformed code")]
    Malformed,
    #[error("checksum mismatch")]
    BadChecksum,
}

impl QrGenerator {
    pub fn new(prefix: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { prefix: prefix.into().to_uppercase(), secret: secret.into() }
    }

    pub fn generate(&self, ticket_id: Uuid) -> String {
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        self.generate_with_salt(ticket_id, &salt)
    }

    fn generate_with_salt(&self, ticket_id: Uuid, salt: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ticket_id.as_bytes());
        hasher.update(salt);
        let body = hex::encode(&hasher.finalize()[..BODY_LEN / 2]);
        let checksum = self.checksum(&body);
        format!("{}-{}-{}", self.prefix, body, checksum)
    }

    fn checksum(&self, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(body.as_bytes());
        hasher.update(self.secret.as_bytes());
        hex::encode_upper(&hasher.finalize()[..CHECKSUM_LEN / 2])
    }

    /// Offline check of shape and checksum. Scanners may change letter case,
    /// so the code is returned in the form it was issued in.
    pub fn verify(&self, code: &str) -> Result<String, QrError> {
        let mut parts = code.trim().splitn(3, '-');
        let (Some(prefix), Some(body), Some(checksum)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(QrError::Malformed);
        };

        let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
        if !prefix.eq_ignore_ascii_case(&self.prefix)
            || body.len() != BODY_LEN
            || checksum.len() != CHECKSUM_LEN
            || !is_hex(body)
            || !is_hex(checksum)
        {
            return Err(QrError::Malformed);
        }

        let body = body.to_lowercase();
        let checksum = checksum.to_uppercase();
        if self.checksum(&body) != checksum {
            return Err(QrError::BadChecksum);
        }
        Ok(format!("{}-{}-{}", self.prefix, body, checksum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> QrGenerator {
        QrGenerator::new("TKT", "gate-secret")
    }

    #[test]
    fn generated_code_has_expected_shape() {
        let code = generator().generate(Uuid::new_v4());
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TKT");
        assert_eq!(parts[1].len(), 16);
        assert_eq!(parts[2].len(), 4);
        assert!(generator().verify(&code).is_ok());
    }

    #[test]
    fn case_variants_verify_to_the_issued_code() {
        let qr = generator();
        let code = qr.generate(Uuid::new_v4());
        assert_eq!(qr.verify(&code.to_lowercase()), Ok(code.clone()));
        assert_eq!(qr.verify(&format!("  {}  ", code.to_uppercase())), Ok(code));
    }

    #[test]
    fn same_ticket_gets_fresh_codes() {
        let id = Uuid::new_v4();
        let qr = generator();
        assert_ne!(qr.generate(id), qr.generate(id));
    }

    #[test]
    fn tampered_body_fails_checksum() {
        let qr = generator();
        let code = qr.generate_with_salt(Uuid::nil(), b"12345678");
        let mut chars: Vec<char> = code.chars().collect();
        let idx = 4;
        chars[idx] = if chars[idx] == '0' { '1' } else { '0' };
        let forged: String = chars.into_iter().collect();
        assert_eq!(qr.verify(&forged), Err(QrError::BadChecksum));
    }

    #[test]
    fn other_secret_rejects_code() {
        let code = generator().generate(Uuid::new_v4());
        let other = QrGenerator::new("TKT", "another-secret");
        assert_eq!(other.verify(&code), Err(QrError::BadChecksum));
    }

    #[test]
    fn malformed_codes() {
        let qr = generator();
        assert_eq!(qr.verify(""), Err(QrError::Malformed));
        assert_eq!(qr.verify("TKT-abc-1234"), Err(QrError::Malformed));
        assert_eq!(qr.verify("XXX-0123456789abcdef-ABCD"), Err(QrError::Malformed));
        assert_eq!(qr.verify("TKT-0123456789abcdeg-ABCD"), Err(QrError::Malformed));
    }
}
