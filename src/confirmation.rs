//! Signup confirmation codes.
//!
//! A code is `<issued-at, hex>-<truncated HMAC-SHA256, hex>`. The MAC covers the
//! user's id, email and `last_login`, so a code stops verifying as soon as the
//! user exchanges any code for a token.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::User;

type HmacSha256 = Hmac<Sha256>;

const TAG_BYTES: usize = 12;

pub trait ConfirmationCodes: Send + Sync {
    fn issue(&self, user: &User) -> String;
    fn verify(&self, user: &User, code: &str) -> bool;
}

#[derive(Clone)]
pub struct HmacCodes {
    mac: HmacSha256,
    ttl_secs: i64,
}

impl HmacCodes {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self { mac: HmacSha256::new_from_slice(secret)?, ttl_secs })
    }

    fn keyed(&self, user: &User, issued_at: i64) -> HmacSha256 {
        let last_login = user.last_login.map(|t| t.timestamp_micros().to_string()).unwrap_or_default();
        let mut mac = self.mac.clone();
        mac.update(format!("{}|{}|{}|{}", user.id, user.email, last_login, issued_at).as_bytes());
        mac
    }

    pub fn issue_at(&self, user: &User, issued_at: i64) -> String {
        let tag = self.keyed(user, issued_at).finalize().into_bytes();
        format!("{issued_at:x}-{}", hex::encode(&tag[..TAG_BYTES]))
    }

    pub fn verify_at(&self, user: &User, code: &str, now: i64) -> bool {
        let Some((issued, tag)) = code.trim().split_once('-') else {
            return false;
        };
        let (Ok(issued_at), Ok(tag)) = (i64::from_str_radix(issued, 16), hex::decode(tag)) else {
            return false;
        };
        if tag.len() != TAG_BYTES || issued_at > now || now - issued_at > self.ttl_secs {
            return false;
        }
        self.keyed(user, issued_at).verify_truncated_left(&tag).is_ok()
    }
}

impl ConfirmationCodes for HmacCodes {
    fn issue(&self, user: &User) -> String {
        self.issue_at(user, Utc::now().timestamp())
    }

    fn verify(&self, user: &User, code: &str) -> bool {
        self.verify_at(user, code, Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    const TTL: i64 = 3 * 24 * 3600;

    fn user() -> User {
        User {
            id: 5,
            username: "reader".into(),
            email: "reader@example.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            bio: String::new(),
            role: Role::User,
            is_superuser: false,
            last_login: None,
            date_joined: Utc::now(),
        }
    }

    fn codes() -> HmacCodes {
        HmacCodes::new(b"0123456789abcdef0123456789abcdef", TTL).unwrap()
    }

    #[test]
    fn issued_code_verifies_within_ttl() {
        let c = codes();
        let code = c.issue_at(&user(), 1_000);
        assert!(c.verify_at(&user(), &code, 1_000));
        assert!(c.verify_at(&user(), &code, 1_000 + TTL));
        assert!(!c.verify_at(&user(), &code, 1_001 + TTL));
    }

    #[test]
    fn login_invalidates_code() {
        let c = codes();
        let mut u = user();
        let code = c.issue(&u);
        assert!(c.verify(&u, &code));
        u.last_login = Some(Utc::now());
        assert!(!c.verify(&u, &code));
    }

    #[test]
    fn code_is_bound_to_user_and_key() {
        let c = codes();
        let code = c.issue_at(&user(), 50);
        let mut other = user();
        other.email = "other@example.com".into();
        assert!(!c.verify_at(&other, &code, 60));

        let foreign = HmacCodes::new(b"another-secret-another-secret-xx", TTL).unwrap();
        assert!(!foreign.verify_at(&user(), &code, 60));
    }

    #[test]
    fn garbage_is_rejected() {
        let c = codes();
        for bad in ["", "nodash", "zz-abcdef", "10-nothex", "10-abcd"] {
            assert!(!c.verify_at(&user(), bad, 20), "{bad}");
        }
    }
}
