//! Signed unsubscribe tokens.

use hex;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use url::Url;

use {ErrorKind, Result};

/// Signs and checks the tokens that prove a request comes from the recipient a mailing was sent
/// to. A token is bound to a `(mailing, record, email)` triple. Cheaply clonable.
#[derive(Clone)]
pub struct Signer {
    mac: Hmac<Sha512>,
}

impl Signer {
    /// Creates a `Signer` with the given secret.
    pub fn new(secret: &str) -> Result<Signer> {
        if secret.is_empty() {
            return Err(ErrorKind::EmptySecret.into());
        }
        // HMAC accepts keys of any length.
        let mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return Err(ErrorKind::EmptySecret.into()),
        };
        Ok(Signer { mac })
    }

    /// Computes the hex-encoded token for a recipient.
    pub fn token(&self, mailing_id: i32, res_id: i32, email: &str) -> String {
        hex::encode(self.keyed(mailing_id, res_id, email).finalize().into_bytes())
    }

    /// Checks a token. Any missing (or empty, or zero) field makes the token invalid. The
    /// comparison is constant-time.
    pub fn verify(
        &self,
        mailing_id: Option<i32>,
        res_id: Option<i32>,
        email: Option<&str>,
        token: Option<&str>,
    ) -> bool {
        match (mailing_id, res_id, email, token) {
            (Some(mailing_id), Some(res_id), Some(email), Some(token))
                if mailing_id != 0 && res_id != 0 && !email.is_empty() && !token.is_empty() =>
            {
                match hex::decode(token) {
                    Ok(bytes) => self
                        .keyed(mailing_id, res_id, email)
                        .verify_slice(&bytes)
                        .is_ok(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Builds the signed unsubscribe link for a recipient.
    pub fn unsubscribe_url(
        &self,
        base_url: &Url,
        mailing_id: i32,
        res_id: i32,
        email: &str,
    ) -> Result<Url> {
        let mut url = base_url.join(&format!("mail/mailing/{}/unsubscribe", mailing_id))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("email", email)
            .append_pair("res_id", &res_id.to_string())
            .append_pair("token", &self.token(mailing_id, res_id, email));
        Ok(url)
    }

    fn keyed(&self, mailing_id: i32, res_id: i32, email: &str) -> Hmac<Sha512> {
        let mut mac = self.mac.clone();
        mac.update(format!("{}:{}:{}", mailing_id, res_id, email).as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new("correct horse battery staple").unwrap()
    }

    #[test]
    fn empty_secret_is_rejected() {
        match Signer::new("") {
            Err(err) => match *err.kind() {
                ErrorKind::EmptySecret => {}
                ref kind => panic!("unexpected error {}", kind),
            },
            Ok(_) => panic!("an empty secret was accepted"),
        }
    }

    #[test]
    fn tokens_are_deterministic_and_bound_to_the_triple() {
        let s = signer();
        let t = s.token(1, 2, "alice@example.com");
        assert_eq!(t, s.token(1, 2, "alice@example.com"));
        assert_eq!(t.len(), 128);
        assert_ne!(t, s.token(1, 3, "alice@example.com"));
        assert_ne!(t, s.token(2, 2, "alice@example.com"));
        assert_ne!(t, s.token(1, 2, "bob@example.com"));
        assert_ne!(t, Signer::new("other").unwrap().token(1, 2, "alice@example.com"));
    }

    #[test]
    fn verify_accepts_only_the_matching_token() {
        let s = signer();
        let t = s.token(1, 2, "alice@example.com");
        assert!(s.verify(Some(1), Some(2), Some("alice@example.com"), Some(&t)));
        assert!(!s.verify(Some(1), Some(2), Some("bob@example.com"), Some(&t)));
        assert!(!s.verify(Some(1), Some(2), Some("alice@example.com"), Some("zz")));

        let mut tampered = t.clone().into_bytes();
        tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!s.verify(Some(1), Some(2), Some("alice@example.com"), Some(&tampered)));
    }

    #[test]
    fn missing_fields_are_invalid() {
        let s = signer();
        let t = s.token(1, 2, "alice@example.com");
        assert!(!s.verify(None, Some(2), Some("alice@example.com"), Some(&t)));
        assert!(!s.verify(Some(1), None, Some("alice@example.com"), Some(&t)));
        assert!(!s.verify(Some(1), Some(2), None, Some(&t)));
        assert!(!s.verify(Some(1), Some(2), Some("alice@example.com"), None));
        assert!(!s.verify(Some(1), Some(2), Some("alice@example.com"), Some("")));
        assert!(!s.verify(Some(0), Some(2), Some("alice@example.com"), Some(&t)));
    }

    #[test]
    fn unsubscribe_url_carries_a_valid_token() {
        let s = signer();
        let base = Url::parse("https://mail.example.com/").unwrap();
        let url = s.unsubscribe_url(&base, 7, 9, "alice@example.com").unwrap();
        assert_eq!(url.path(), "/mail/mailing/7/unsubscribe");
        let token = url
            .query_pairs()
            .find(|&(ref k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(s.verify(Some(7), Some(9), Some("alice@example.com"), Some(&token)));
    }
}
