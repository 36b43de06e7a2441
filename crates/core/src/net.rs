// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort local address discovery
//!
//! Contender nodes carry the creating host's address as an opaque diagnostic
//! payload so operators can see who is queued. Nothing reads it back
//! programmatically.

use std::net::UdpSocket;
use std::sync::OnceLock;

static LOCAL_ADDR: OnceLock<String> = OnceLock::new();

/// The local outbound address, discovered once and cached. Falls back to
/// `"unknown"` when no route exists.
pub fn local_addr() -> &'static str {
    LOCAL_ADDR.get_or_init(|| match discover() {
        Some(addr) => addr,
        None => {
            tracing::warn!("could not determine local address");
            "unknown".to_string()
        }
    })
}

fn discover() -> Option<String> {
    // Connecting a UDP socket sends nothing; it only selects the interface
    // the OS would route external traffic through.
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addr_is_stable() {
        let first = local_addr();
        let second = local_addr();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
