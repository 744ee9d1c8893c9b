use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::db;
use crate::error::{ChatError, Result};
use crate::models::{Staff, Visitor};

type HmacSha256 = Hmac<Sha256>;

/// Signing secret for session tokens. Read once at startup.
#[derive(Clone)]
pub struct TokenSecret(pub String);

impl TokenSecret {
    pub fn from_env() -> Self {
        TokenSecret(
            std::env::var("CHAT_TOKEN_SECRET").unwrap_or_else(|_| "helpline-dev-secret".to_string()),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    kind: String,
    exp: i64,
}

/// The authenticated party behind a connection or event call.
#[derive(Debug, Clone)]
pub enum Identity {
    Visitor(Visitor),
    Staff(Staff),
}

impl Identity {
    pub fn id(&self) -> &str {
        match self {
            Identity::Visitor(v) => &v.id,
            Identity::Staff(s) => &s.id,
        }
    }
}

/// Issue a signed bearer token: `base64url(claims).hex(hmac_sha256(claims))`.
pub fn issue_token(secret: &TokenSecret, subject_id: &str, kind: &str, ttl_secs: i64) -> String {
    let claims = TokenClaims {
        sub: subject_id.to_string(),
        kind: kind.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    let payload = serde_json::to_vec(&claims).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(&payload);
    let mut mac = HmacSha256::new_from_slice(secret.0.as_bytes()).expect("HMAC accepts any key length");
    mac.update(encoded.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("{encoded}.{signature}")
}

/// Verify signature and expiry, then load the subject row. Fails with
/// `ChatError::Auth` on any defect: missing parts, bad signature, expired
/// claims, unknown or disabled subject.
pub fn resolve_token(conn: &Connection, secret: &TokenSecret, token: &str) -> Result<Identity> {
    let (encoded, signature) = token.split_once('.').ok_or(ChatError::Auth)?;

    let mut mac = HmacSha256::new_from_slice(secret.0.as_bytes()).map_err(|_| ChatError::Auth)?;
    mac.update(encoded.as_bytes());
    let expected = hex::decode(signature).map_err(|_| ChatError::Auth)?;
    mac.verify_slice(&expected).map_err(|_| ChatError::Auth)?;

    let payload = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| ChatError::Auth)?;
    let claims: TokenClaims = serde_json::from_slice(&payload).map_err(|_| ChatError::Auth)?;

    if claims.exp < chrono::Utc::now().timestamp() {
        return Err(ChatError::Auth);
    }

    match claims.kind.as_str() {
        "visitor" => {
            let visitor = db::get_visitor(conn, &claims.sub).ok_or(ChatError::Auth)?;
            if visitor.disabled {
                return Err(ChatError::Auth);
            }
            Ok(Identity::Visitor(visitor))
        }
        "staff" => {
            let staff = db::get_staff(conn, &claims.sub).ok_or(ChatError::Auth)?;
            if staff.disabled {
                return Err(ChatError::Auth);
            }
            Ok(Identity::Staff(staff))
        }
        _ => Err(ChatError::Auth),
    }
}
