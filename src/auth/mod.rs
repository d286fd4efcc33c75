//! Bearer-token authentication gate (spec §4.6/§4.7).
//!
//! Grounded on `original_source/services/token.py::TokenManager`
//! (decode, positive-result cache keyed by the raw token string with a
//! prune-at-100 cleanup) and `original_source/middleware/auth.py`'s
//! skip-path logic (`login`/`health` prefixed paths bypass auth
//! entirely).

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::errors::AuthError;

const CACHE_CAPACITY: usize = 100;

/// Decoded bearer-token claims, attached to the request once
/// validated (spec §4.6's `TokenPayload`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

struct CacheEntry {
    payload: TokenPayload,
    expires_at: i64,
}

/// Paths that bypass authentication entirely — matched against the
/// path with leading/trailing slashes stripped, as a prefix.
const SKIP_PREFIXES: [&str; 2] = ["login", "health"];

pub struct TokenValidator {
    secret: String,
    algorithm: Algorithm,
    cache: Mutex<LruCache<String, CacheEntry>>,
}

impl TokenValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let algorithm = parse_algorithm(&config.algorithm);
        Self {
            secret: config.secret_key.clone(),
            algorithm,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero"))),
        }
    }

    /// True when `path` (as given, including any leading slash) should
    /// skip authentication entirely.
    pub fn should_skip(path: &str) -> bool {
        let trimmed = path.trim_matches('/');
        SKIP_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
    }

    /// Validate a raw bearer token, consulting the positive-result
    /// cache first. Cache misses decode via `jsonwebtoken`; a
    /// successful decode is cached until the claimed `exp`.
    pub fn validate(&self, token: &str) -> Result<TokenPayload, AuthError> {
        let now = now_unix();

        if let Some(payload) = self.cached(token, now) {
            return Ok(payload);
        }

        let validation = Validation::new(self.algorithm);
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let claims = decode::<TokenPayload>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        let payload = claims.claims;
        self.insert(token, payload.clone());
        Ok(payload)
    }

    fn cached(&self, token: &str, now: i64) -> Option<TokenPayload> {
        let mut guard = self.cache.lock().expect("token cache poisoned");
        match guard.get(token) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            Some(_) => {
                guard.pop(token);
                None
            }
            None => None,
        }
    }

    fn insert(&self, token: &str, payload: TokenPayload) {
        let mut guard = self.cache.lock().expect("token cache poisoned");
        guard.put(
            token.to_string(),
            CacheEntry {
                expires_at: payload.exp,
                payload,
            },
        );
    }
}

fn parse_algorithm(name: &str) -> Algorithm {
    match name {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        "RS256" => Algorithm::RS256,
        _ => Algorithm::HS256,
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn config() -> JwtConfig {
        JwtConfig {
            secret_key: "test-secret".to_string(),
            algorithm: "HS256".to_string(),
        }
    }

    fn token_for(exp: i64, secret: &str) -> String {
        let claims = TokenPayload {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            roles: vec!["admin".to_string()],
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn skip_paths_match_login_and_health_prefix() {
        assert!(TokenValidator::should_skip("/login"));
        assert!(TokenValidator::should_skip("/health/live"));
        assert!(TokenValidator::should_skip("login"));
        assert!(!TokenValidator::should_skip("/api/users"));
    }

    #[test]
    fn valid_token_decodes_and_caches() {
        let validator = TokenValidator::new(&config());
        let token = token_for(now_unix() + 300, "test-secret");
        let payload = validator.validate(&token).expect("should validate");
        assert_eq!(payload.user_id, "u1");
        assert!(validator.cache.lock().unwrap().contains(&token));
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = TokenValidator::new(&config());
        let token = token_for(now_unix() - 10, "test-secret");
        let err = validator.validate(&token).unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let validator = TokenValidator::new(&config());
        let token = token_for(now_unix() + 300, "other-secret");
        let err = validator.validate(&token).unwrap_err();
        assert_eq!(err, AuthError::Invalid);
    }

    #[test]
    fn cache_hit_skips_second_decode_even_past_exp_check() {
        let validator = TokenValidator::new(&config());
        let token = token_for(now_unix() + 300, "test-secret");
        validator.validate(&token).unwrap();
        let second = validator.validate(&token).unwrap();
        assert_eq!(second.user_id, "u1");
    }
}
