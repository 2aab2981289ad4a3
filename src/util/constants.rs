//! Centralized constants for run configuration
//!
//! All timeout and limit values in one place for easy tuning.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Bootstrap handshake
// ═══════════════════════════════════════════════════════════════

/// Timeout for the `/v1/sys/init` request
pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing HTTP connections
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of HTTP redirects to follow
pub const REDIRECT_LIMIT: usize = 5;

/// Bytes of a failed response body kept for diagnostics
pub const SNIPPET_LIMIT: usize = 256;

pub const USER_AGENT: &str = concat!("vaultgraph/", env!("CARGO_PKG_VERSION"));

// ═══════════════════════════════════════════════════════════════
// Run lifecycle
// ═══════════════════════════════════════════════════════════════

/// How long `finalize` waits for exports before failing the stragglers
pub const FINALIZE_DEADLINE: Duration = Duration::from_secs(600);

// ═══════════════════════════════════════════════════════════════
// Vault initialization parameters
// ═══════════════════════════════════════════════════════════════

pub const RECOVERY_SHARES: u8 = 5;
pub const RECOVERY_THRESHOLD: u8 = 3;
pub const STORED_SHARES: u8 = 5;

// ═══════════════════════════════════════════════════════════════
// Certificate authorities
// ═══════════════════════════════════════════════════════════════

/// Root CA lifetime and PKI mount max lease (two years)
pub const PKI_MAX_TTL: Duration = Duration::from_secs(2 * 365 * 24 * 60 * 60);

/// Lifetime of a signed SSH user certificate
pub const SSH_CERT_TTL: Duration = Duration::from_secs(60 * 60);

/// Extensions SSH roles allow and grant by default
pub const SSH_EXTENSIONS: [&str; 5] = [
    "permit-pty",
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-user-rc",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_positive() {
        assert!(INIT_TIMEOUT.as_secs() > 0);
        assert!(CONNECT_TIMEOUT.as_secs() > 0);
        assert!(FINALIZE_DEADLINE > INIT_TIMEOUT);
    }

    #[test]
    fn threshold_fits_within_shares() {
        assert!(RECOVERY_THRESHOLD <= RECOVERY_SHARES);
        assert!(STORED_SHARES <= RECOVERY_SHARES);
    }

    #[test]
    fn ssh_cert_ttl_is_shorter_than_root_ttl() {
        assert!(SSH_CERT_TTL < PKI_MAX_TTL);
    }
}
