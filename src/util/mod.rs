//! Utilities Module - shared infrastructure
//!
//! - `constants`: Centralized timeouts and limits
//! - `mask_secret` / `truncate_snippet`: display helpers for sensitive and bulky strings

pub mod constants;

pub use constants::{CONNECT_TIMEOUT, FINALIZE_DEADLINE, INIT_TIMEOUT, REDIRECT_LIMIT};

/// Mask a secret for display, keeping `visible` leading characters
///
/// Short values are fully masked.
pub fn mask_secret(value: &str, visible: usize) -> String {
    let count = value.chars().count();
    if count <= visible * 2 {
        return "*".repeat(count.max(8));
    }
    let prefix: String = value.chars().take(visible).collect();
    format!("{}{}", prefix, "*".repeat(count - visible))
}

/// Truncate a body to `limit` bytes on a char boundary
pub fn truncate_snippet(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
