//! # Voter Identity
//!
//! Best-effort voter identity. Two keys per request:
//!
//! - **compound**: `network_address-client_signature`, or just the address when
//!   the client sends no `User-Agent`
//! - **token**: opaque UUID v4 kept by the client in the `voter_id` cookie
//!
//! A ballot already indexed under either key blocks the request. Both keys are
//! trivially spoofable. They stop casual repeat voting, nothing more.
use axum_extra::extract::cookie::{Cookie, CookieJar};
use time::Duration;
use uuid::Uuid;

pub const VOTER_COOKIE: &str = "voter_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity {
    pub network_address: String,
    pub client_signature: String,
    pub compound_key: String,
    pub token_key: String,
    /// Set when the token was minted for this request and still has to reach the client.
    pub issued: bool,
}

impl VoterIdentity {
    pub fn resolve(network_address: &str, client_signature: &str, token: Option<&str>) -> Self {
        let (token_key, issued) = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => (token.to_string(), false),
            None => (Uuid::new_v4().to_string(), true),
        };

        Self {
            network_address: network_address.to_string(),
            client_signature: client_signature.to_string(),
            compound_key: compound_key(network_address, client_signature),
            token_key,
            issued,
        }
    }

    pub fn from_jar(network_address: &str, client_signature: &str, jar: &CookieJar) -> Self {
        Self::resolve(
            network_address,
            client_signature,
            jar.get(VOTER_COOKIE).map(Cookie::value),
        )
    }

    /// Hands a freshly minted token back to the client. Existing tokens are left alone.
    pub fn persist(&self, jar: CookieJar, ttl_hours: i64) -> CookieJar {
        if !self.issued {
            return jar;
        }

        jar.add(
            Cookie::build((VOTER_COOKIE, self.token_key.clone()))
                .path("/")
                .http_only(true)
                .max_age(Duration::hours(ttl_hours)),
        )
    }

    pub fn keys(&self) -> [&str; 2] {
        [&self.compound_key, &self.token_key]
    }
}

pub fn compound_key(network_address: &str, client_signature: &str) -> String {
    if client_signature.is_empty() {
        network_address.to_string()
    } else {
        format!("{network_address}-{client_signature}")
    }
}
