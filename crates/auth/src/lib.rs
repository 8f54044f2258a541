use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::HeaderMap;
use http::header;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// Public signing keys for Firebase ID tokens, in JWKS form.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const MAX_SUBJECT_LEN: usize = 128;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    pub const REQUIRED: &'static str = "ERR_AUTH_REQUIRED";
    pub const INVALID: &'static str = "ERR_AUTH_INVALID";
    pub const UNAVAILABLE: &'static str = "ERR_AUTH_UNAVAILABLE";
    pub const INVALID_CONFIG: &'static str = "ERR_INVALID_CONFIG";

    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID, message)
    }

    /// The caller presented no usable credential, as opposed to the verifier failing.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self.code, Self::REQUIRED | Self::INVALID)
    }
}

/// Identity attached to a request once its bearer token has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl UserIdentity {
    pub fn from_claims(claims: &Value) -> Result<Self, AuthError> {
        let user_id = ["uid", "user_id", "sub"]
            .iter()
            .find_map(|claim| optional_claim_string(claims, claim))
            .ok_or_else(|| AuthError::invalid("token carries no subject claim"))?;

        Ok(Self {
            user_id,
            name: optional_claim_string(claims, "name"),
            email: optional_claim_string(claims, "email"),
            email_verified: claims
                .get("email_verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the decoded claims of a valid token.
    async fn verify(&self, token: &str) -> Result<Value, AuthError>;
}

pub async fn authenticate(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
) -> Result<UserIdentity, AuthError> {
    let token = bearer_token(headers)?;
    let claims = verifier.verify(&token).await?;
    UserIdentity::from_claims(&claims)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AuthError::new(AuthError::REQUIRED, "missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::invalid("Authorization header is not valid ASCII"))?;

    let token = authz
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::invalid("Authorization must be a Bearer token"))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::invalid("Bearer token is empty"));
    }

    Ok(token.to_string())
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub project_id: String,
    pub jwks_url: Option<String>,
    pub jwks_json: Option<String>,
    pub jwks_timeout: Duration,
    pub jwks_refresh_ttl: Duration,
    pub clock_skew: Duration,
}

impl FirebaseConfig {
    pub fn issuer(&self) -> String {
        format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)
    }
}

/// Verifies Firebase ID tokens (RS256, keys from a cached JWKS document).
#[derive(Clone)]
pub struct FirebaseVerifier {
    config: FirebaseConfig,
    issuer: String,
    http: reqwest::Client,
    jwks: Arc<RwLock<JwksCache>>,
}

#[derive(Debug)]
struct JwksCache {
    jwks: Option<JwkSet>,
    fetched_at: Option<Instant>,
}

impl FirebaseVerifier {
    pub async fn new(config: FirebaseConfig) -> Result<Self, AuthError> {
        if config.project_id.trim().is_empty() {
            return Err(AuthError::new(
                AuthError::INVALID_CONFIG,
                "firebase project id must be non-empty",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.jwks_timeout)
            .build()
            .map_err(|_| AuthError::new("ERR_INTERNAL", "failed to initialize jwks http client"))?;

        let mut cache = JwksCache {
            jwks: None,
            fetched_at: None,
        };
        cache.refresh(&http, &config).await?;

        Ok(Self {
            issuer: config.issuer(),
            config,
            http,
            jwks: Arc::new(RwLock::new(cache)),
        })
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.jwks.read().await;
            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|_| AuthError::invalid("failed to parse JWK decoding key"));
            }
        }

        {
            let mut cache = self.jwks.write().await;
            let refresh_needed = cache
                .fetched_at
                .map(|t| t.elapsed() > self.config.jwks_refresh_ttl)
                .unwrap_or(true);
            if refresh_needed {
                cache.refresh(&self.http, &self.config).await?;
            }

            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|_| AuthError::invalid("failed to parse JWK decoding key"));
            }
        }

        Err(AuthError::invalid("JWT kid not found in JWKS"))
    }
}

#[async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<Value, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::invalid("invalid JWT header"))?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError::invalid("unsupported JWT alg (expected RS256)"));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::invalid("JWT header missing kid"))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_audience(std::slice::from_ref(&self.config.project_id));
        validation.leeway = self.config.clock_skew.as_secs();

        let decoded = decode::<Value>(token, &decoding_key, &validation)
            .map_err(|_| AuthError::invalid("JWT validation failed"))?;

        let mut claims = decoded.claims;
        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty() && s.len() <= MAX_SUBJECT_LEN)
            .map(|s| s.to_string())
            .ok_or_else(|| AuthError::invalid("JWT subject is missing or too long"))?;

        if let Some(obj) = claims.as_object_mut() {
            obj.entry("uid").or_insert(Value::String(subject));
        }

        Ok(claims)
    }
}

impl JwksCache {
    fn jwk_for_kid(&self, kid: &str) -> Option<&jsonwebtoken::jwk::Jwk> {
        self.jwks.as_ref()?.find(kid)
    }

    async fn refresh(
        &mut self,
        http: &reqwest::Client,
        config: &FirebaseConfig,
    ) -> Result<(), AuthError> {
        let jwks = if let Some(jwks_json) = config.jwks_json.as_ref() {
            serde_json::from_str::<JwkSet>(jwks_json).map_err(|_| {
                AuthError::new(
                    AuthError::INVALID_CONFIG,
                    "FIREBASE_JWKS_JSON is not valid JWKS JSON",
                )
            })?
        } else {
            let url = config.jwks_url.as_deref().unwrap_or(FIREBASE_JWKS_URL);
            http.get(url)
                .send()
                .await
                .map_err(|_| AuthError::new(AuthError::UNAVAILABLE, "failed to fetch JWKS"))?
                .error_for_status()
                .map_err(|_| {
                    AuthError::new(
                        AuthError::UNAVAILABLE,
                        "JWKS endpoint returned non-success status",
                    )
                })?
                .json::<JwkSet>()
                .await
                .map_err(|_| AuthError::new(AuthError::UNAVAILABLE, "failed to parse JWKS JSON"))?
        };

        tracing::debug!(keys = jwks.keys.len(), "auth.jwks_refreshed");
        self.jwks = Some(jwks);
        self.fetched_at = Some(Instant::now());
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedSecretConfig {
    pub secret: String,
    pub algorithm: Algorithm,
}

impl std::fmt::Debug for SharedSecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

pub fn parse_hmac_algorithm(name: &str) -> Result<Algorithm, AuthError> {
    match name.trim() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        _ => Err(AuthError::new(
            AuthError::INVALID_CONFIG,
            "JWT_ALGORITHM must be HS256, HS384 or HS512",
        )),
    }
}

/// Issues and verifies locally signed HMAC tokens for development setups.
#[derive(Clone)]
pub struct SharedSecretVerifier {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl SharedSecretVerifier {
    pub fn new(config: SharedSecretConfig) -> Result<Self, AuthError> {
        if config.secret.is_empty() {
            return Err(AuthError::new(
                AuthError::INVALID_CONFIG,
                "JWT_SECRET_KEY must be non-empty",
            ));
        }
        if !matches!(
            config.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::new(
                AuthError::INVALID_CONFIG,
                "shared secret tokens require an HMAC algorithm",
            ));
        }

        Ok(Self {
            algorithm: config.algorithm,
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
        })
    }

    pub fn sign(&self, claims: &Value) -> Result<String, AuthError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|_| AuthError::new("ERR_INTERNAL", "failed to sign token"))
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> Result<Value, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_aud = false;

        decode::<Value>(token, &self.decoding_key, &validation)
            .map(|decoded| decoded.claims)
            .map_err(|_| AuthError::invalid("JWT validation failed"))
    }
}

fn optional_claim_string(claims: &Value, claim: &str) -> Option<String> {
    claims
        .get(claim)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
