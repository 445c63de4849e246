use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A participating team and the address of its vulnerable services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,

    /// Address of the team's "vulnbox"; checkers connect here.
    pub ip: String,

    /// Opaque secret used to authenticate flag submissions.
    pub token: String,

    /// Soft-delete flag; inactive teams are not probed or scored.
    pub active: bool,
}

impl Team {
    /// Generate a fresh 16-hex-char submission token from the OS RNG.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// View exposed to participants and spectators (no token).
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "ip": self.ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_sixteen_hex_chars() {
        let token = Team::generate_token();
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(Team::generate_token(), Team::generate_token());
    }
}
