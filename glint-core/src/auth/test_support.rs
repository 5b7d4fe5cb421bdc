//! Fixed keys and token minting shared by the auth unit tests

use super::types::IdentityClaims;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

pub const ISSUER: &str = "https://auth.glint.app";
pub const SIGNING_KID: &str = "glint-2026-01";
pub const JWKS_JSON: &str = include_str!("../../testdata/jwks.json");
pub const ROTATED_JWKS_JSON: &str = include_str!("../../testdata/jwks_rotated.json");

const SIGNING_KEY_PEM: &[u8] = include_bytes!("../../testdata/signing_key.pem");
const FOREIGN_KEY_PEM: &[u8] = include_bytes!("../../testdata/foreign_key.pem");

pub fn claims_for(sub: &str, ttl: Duration) -> IdentityClaims {
    let now = Utc::now();
    IdentityClaims {
        sub: sub.to_string(),
        email: Some(format!("{}@example.com", sub)),
        name: None,
        iat: Some(now.timestamp()),
        exp: (now + ttl).timestamp(),
        iss: ISSUER.to_string(),
    }
}

/// Sign with the published key
pub fn sign(claims: &IdentityClaims) -> String {
    sign_with(claims, Some(SIGNING_KID), false)
}

/// Sign arbitrary claims with the published key
pub fn sign_json(claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(SIGNING_KID.to_string());
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(SIGNING_KEY_PEM).unwrap(),
    )
    .unwrap()
}

/// `foreign` signs with a key that is not in the published set
pub fn sign_with(claims: &IdentityClaims, kid: Option<&str>, foreign: bool) -> String {
    let pem = if foreign {
        FOREIGN_KEY_PEM
    } else {
        SIGNING_KEY_PEM
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}
