//! # Tourgate (Access Control & One-Time Credential Verification)
//!
//! `tourgate` makes the security decisions for the tour booking platform. Page
//! rendering, tour/blog data and uploads live elsewhere and either call into
//! this crate or sit behind it.
//!
//! ## Request gating
//!
//! Inbound requests pass the per-identity fixed-window rate limiter first, then
//! the role gate for admin-scoped routes, and only then reach domain handlers.
//! The limiter state is per process; running several replicas multiplies the
//! effective quota by the replica count.
//!
//! ## One-time credentials
//!
//! Email codes are single use. Consumption is a conditional update in the
//! datastore, so two concurrent submissions of the same code cannot both win.
//! Every failure (wrong code, expired code, already used, lost race) produces
//! the same generic answer.
//!
//! ## Recovery and two-factor status
//!
//! The password-recovery "token" is the ambient authenticated session; the
//! claimed email must match the session's email. Two-factor status is available
//! pre-authentication by email (uniform shape for unknown accounts) and
//! post-authentication for the caller only.
//!
//! ## Embeds
//!
//! Map widgets supplied by editors are checked against a fixed allow-list of
//! mapping providers before they are rendered. See [`embed`].

pub mod api;
pub mod cli;
pub mod embed;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
