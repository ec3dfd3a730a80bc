//! Plane config file model
//!
//! A plane config is an operator-owned interface section followed by peer
//! stanzas darksite manages. Only the peer section is ever regenerated.

use crate::error::{DarksiteError, DarksiteResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipnet::IpNet;
use std::fmt;

/// Length of a base64 encoded 32 byte key
pub const WG_KEY_B64_LEN: usize = 44;

/// Check that `key` is a base64 encoded 32 byte WireGuard key
pub fn validate_wg_key(key: &str) -> DarksiteResult<()> {
    let invalid = |reason: String| DarksiteError::InvalidKey {
        kind: "wireguard".to_string(),
        reason,
    };

    if key.len() != WG_KEY_B64_LEN {
        return Err(invalid(format!(
            "expected {} characters, got {}",
            WG_KEY_B64_LEN,
            key.len()
        )));
    }
    let bytes = STANDARD
        .decode(key)
        .map_err(|e| invalid(format!("not base64: {}", e)))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("expected 32 bytes, got {}", bytes.len())));
    }
    Ok(())
}

/// A public key fetched from a remote node counts as present when it is a
/// single non-empty token. Multi-word replies are mesh error text.
pub fn is_published_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty()
        && !key.chars().any(char::is_whitespace)
        && !key.to_ascii_uppercase().starts_with("ERROR")
}

/// Everything before the first line whose trimmed form starts with `[Peer]`
pub fn interface_section(existing: &str) -> &str {
    let mut offset = 0;
    for line in existing.split_inclusive('\n') {
        if line.trim().starts_with("[Peer]") {
            return &existing[..offset];
        }
        offset += line.len();
    }
    existing
}

/// One `[Peer]` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStanza {
    /// Seed node name, written as a comment
    pub name: String,
    pub plane: String,
    pub public_key: String,
    pub allowed_ips: IpNet,
    /// `host:port` the local side dials; spokes only
    pub endpoint: Option<String>,
    pub keepalive: u16,
}

impl fmt::Display for PeerStanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Peer]")?;
        writeln!(f, "# {} ({})", self.name, self.plane)?;
        writeln!(f, "PublicKey = {}", self.public_key)?;
        writeln!(f, "AllowedIPs = {}", self.allowed_ips)?;
        if let Some(endpoint) = &self.endpoint {
            writeln!(f, "Endpoint = {}", endpoint)?;
        }
        writeln!(f, "PersistentKeepalive = {}", self.keepalive)
    }
}

/// Render a full config: interface section, one blank line, peers separated
/// by blank lines, exactly one trailing newline.
pub fn compose(header: &str, peers: &[PeerStanza]) -> String {
    let mut text = String::new();
    let header = header.trim_end();
    if !header.is_empty() {
        text.push_str(header);
        text.push_str("\n\n");
    }
    for peer in peers {
        text.push_str(&peer.to_string());
        text.push('\n');
    }
    let trimmed_len = text.trim_end().len();
    text.truncate(trimmed_len);
    text.push('\n');
    text
}

/// Format `host:port`, bracketing bare IPv6 hosts
pub fn endpoint(host: &str, port: u16) -> String {
    let host = host.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::fake_wg_key;
    use pretty_assertions::assert_eq;

    const BASE: &str = "[Interface]\nAddress = 10.78.0.2/24\nPrivateKey = abc\nListenPort = 51820\n";

    fn peer(name: &str, ip: &str) -> PeerStanza {
        PeerStanza {
            name: name.to_string(),
            plane: "wg1".to_string(),
            public_key: "PUB".to_string(),
            allowed_ips: ip.parse().unwrap(),
            endpoint: None,
            keepalive: 25,
        }
    }

    #[test]
    fn test_interface_section_stops_at_first_peer() {
        let existing = format!("{}\n  [Peer]\nPublicKey = X\n", BASE);
        assert_eq!(interface_section(&existing), format!("{}\n", BASE));
        assert_eq!(interface_section(BASE), BASE);
        assert_eq!(interface_section("[Peer]\nPublicKey = X\n"), "");
    }

    #[test]
    fn test_compose_layout() {
        let text = compose(BASE, &[peer("a", "10.78.0.2/32"), peer("b", "10.78.0.3/32")]);
        assert_eq!(
            text,
            "[Interface]\nAddress = 10.78.0.2/24\nPrivateKey = abc\nListenPort = 51820\n\n\
             [Peer]\n# a (wg1)\nPublicKey = PUB\nAllowedIPs = 10.78.0.2/32\nPersistentKeepalive = 25\n\n\
             [Peer]\n# b (wg1)\nPublicKey = PUB\nAllowedIPs = 10.78.0.3/32\nPersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn test_compose_normalises_header_whitespace_once() {
        let header = format!("{}\n\n\n   \n", BASE);
        let first = compose(&header, &[peer("a", "10.78.0.2/32")]);
        let again = compose(interface_section(&first), &[peer("a", "10.78.0.2/32")]);
        assert_eq!(first, again);
        assert!(first.starts_with(&format!("{}\n[Peer]", BASE)));
    }

    #[test]
    fn test_compose_without_peers() {
        assert_eq!(compose(BASE, &[]), BASE);
    }

    #[test]
    fn test_spoke_stanza_has_endpoint() {
        let stanza = PeerStanza {
            endpoint: Some(endpoint("1.2.3.4", 51820)),
            ..peer("master.local", "10.78.0.0/24")
        };
        assert!(stanza
            .to_string()
            .contains("AllowedIPs = 10.78.0.0/24\nEndpoint = 1.2.3.4:51820\n"));
        assert_eq!(endpoint("fd00::1", 51820), "[fd00::1]:51820");
    }

    #[test]
    fn test_wg_key_validation() {
        assert!(validate_wg_key(&fake_wg_key(1)).is_ok());
        assert!(validate_wg_key("").is_err());
        assert!(validate_wg_key("ERROR: File not found").is_err());
        assert!(validate_wg_key(&"A".repeat(44)).is_err());
        let mut bad = fake_wg_key(1);
        bad.replace_range(0..1, "*");
        assert!(validate_wg_key(&bad).is_err());
    }

    #[test]
    fn test_published_key_accepts_any_single_token() {
        assert!(is_published_key("MPUB"));
        assert!(is_published_key(&fake_wg_key(3)));
        assert!(is_published_key("  PUB1\n"));
        assert!(!is_published_key(""));
        assert!(!is_published_key("   "));
        assert!(!is_published_key("ERROR: File not found"));
        assert!(!is_published_key("ERROR:"));
        assert!(!is_published_key("Minion did not return"));
    }
}
