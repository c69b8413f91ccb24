use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub jti: String, // JWT ID (unique per token)
    pub exp: i64,    // Expiration time
    pub iat: i64,    // Issued at
    pub iss: String, // Issuer
}

/// Verifies (and for tests and the marketplace auth flow, issues) the HS256
/// bearer tokens that identify a user before the messaging core sees the
/// connection. The same secret is shared with the marketplace's auth service.
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl_hours: i64,
    issuer: String,
}

impl AuthManager {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_token_ttl_hours: config.access_token_ttl_hours,
            issuer: config.jwt_issuer.clone(),
        }
    }

    /// Create an access token for a user. Returns the token and its jti.
    pub fn create_token(&self, user_id: &str) -> Result<(String, String)> {
        let now = Utc::now();
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: jti.clone(),
            exp: (now + Duration::hours(self.access_token_ttl_hours)).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, jti))
    }

    /// Verify a token's signature, expiry and issuer, returning its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Extracts the token from an `Authorization` header value, tolerating the
/// bare-token form some clients send.
pub fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, LoggingConfig};

    fn test_config(secret: &str, issuer: &str) -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            jwt_secret: secret.to_string(),
            jwt_issuer: issuer.to_string(),
            access_token_ttl_hours: 1,
            port: 0,
            http_port: 0,
            rust_log: "info".to_string(),
            db: DbConfig {
                max_connections: 1,
                acquire_timeout_secs: 1,
                idle_timeout_secs: 1,
            },
            logging: LoggingConfig {
                enable_message_metadata: false,
            },
        }
    }

    #[test]
    fn token_round_trip() {
        let auth = AuthManager::new(&test_config("test-secret", "reclaim"));
        let (token, jti) = auth.create_token("user-a").unwrap();

        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-a");
        assert_eq!(claims.jti, jti);
        assert_eq!(claims.iss, "reclaim");
    }

    #[test]
    fn rejects_wrong_secret() {
        let issuing = AuthManager::new(&test_config("secret-one", "reclaim"));
        let verifying = AuthManager::new(&test_config("secret-two", "reclaim"));

        let (token, _) = issuing.create_token("user-a").unwrap();
        assert!(verifying.verify_token(&token).is_err());
    }

    #[test]
    fn rejects_wrong_issuer() {
        let issuing = AuthManager::new(&test_config("shared", "someone-else"));
        let verifying = AuthManager::new(&test_config("shared", "reclaim"));

        let (token, _) = issuing.create_token("user-a").unwrap();
        assert!(verifying.verify_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let config = test_config("shared", "reclaim");
        let auth = AuthManager::new(&config);

        // Expired well past the default leeway
        let claims = Claims {
            sub: "user-a".to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: (Utc::now() - Duration::hours(2)).timestamp(),
            iat: (Utc::now() - Duration::hours(3)).timestamp(),
            iss: "reclaim".to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn bearer_token_strips_prefix() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token(""), None);
    }
}
