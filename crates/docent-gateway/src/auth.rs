use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Mint the short-lived capability token handed out by start_session.
/// The token binds the session to its room; nothing else is encoded.
pub fn mint_token(secret: &str, session_id: &str, room_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{session_id}:{room_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a session capability token.
pub fn verify_token(secret: &str, session_id: &str, room_id: &str, token: &str) -> bool {
    let Ok(bytes) = hex::decode(token) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{session_id}:{room_id}").as_bytes());
    mac.verify_slice(&bytes).is_ok()
}

/// Token for the operator tick room.
pub fn mint_operator_token(secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(b"operator");
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_operator_token(secret: &str, token: &str) -> bool {
    let Ok(bytes) = hex::decode(token) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(b"operator");
    mac.verify_slice(&bytes).is_ok()
}
