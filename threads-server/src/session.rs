use anyhow::Context;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use threads_api::SessionClaims;

use crate::Error;

/// Verifies the session tokens issued by the identity provider
pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    /// `key` is either a PEM-encoded RSA public key, or a shared HS256 secret
    pub fn new(key: &str) -> anyhow::Result<SessionVerifier> {
        let (key, algorithm) = if key.trim_start().starts_with("-----BEGIN") {
            (
                DecodingKey::from_rsa_pem(key.as_bytes())
                    .context("parsing session key as an RSA public key")?,
                Algorithm::RS256,
            )
        } else {
            (DecodingKey::from_secret(key.as_bytes()), Algorithm::HS256)
        };
        Ok(SessionVerifier {
            key,
            validation: Validation::new(algorithm),
        })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, Error> {
        match jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => {
                tracing::debug!(?err, "rejecting session token");
                Err(Error::permission_denied())
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_token(secret: &str, sub: &str, exp: u64) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &SessionClaims {
            sub: String::from(sub),
            exp,
        },
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encoding test token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use threads_api::Error as ApiError;

    fn in_an_hour() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[test]
    fn valid_tokens_carry_the_subject() {
        let v = SessionVerifier::new("local secret").unwrap();
        let claims = v
            .verify(&test_token("local secret", "user_1", in_an_hour()))
            .unwrap();
        assert_eq!(claims.sub, "user_1");
    }

    #[test]
    fn bad_tokens_are_denied() {
        let v = SessionVerifier::new("local secret").unwrap();
        for tok in [
            test_token("other secret", "user_1", in_an_hour()),
            test_token("local secret", "user_1", in_an_hour() - 7200),
            String::from("garbage"),
        ] {
            assert!(matches!(
                v.verify(&tok),
                Err(Error::Api(ApiError::PermissionDenied))
            ));
        }
    }

    #[test]
    fn pem_keys_must_parse() {
        assert!(SessionVerifier::new("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----")
            .is_err());
    }
}
