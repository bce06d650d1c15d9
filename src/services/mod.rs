//! services
//!
//! Per-capability dispatchers and their façade services.
//!
//! # Design
//!
//! Each capability gets two layers. The dispatcher owns the provider
//! registry lookup, the cache fingerprint, and the cache delegation. The
//! façade service binds the credential resolver on top, so HTTP handlers
//! work in terms of git server names rather than resolved settings.
//!
//! Fingerprints are pipe-joined segments with an empty segment for an
//! absent option, so `srv|acme|` and `srv|acme|kw` are distinct entries.

pub mod branches;
pub mod organizations;
pub mod pipelines;
pub mod pull_requests;
pub mod repositories;

pub use branches::{BranchDispatcher, BranchService};
pub use organizations::{spawn_warm_up, OrganizationDispatcher, OrganizationService};
pub use pipelines::{PipelineDispatcher, PipelineService};
pub use pull_requests::{PullRequestDispatcher, PullRequestService};
pub use repositories::{RepositoryDispatcher, RepositoryService};

/// Join fingerprint segments. Empty segments are kept so the arity of
/// every key within one cache is stable.
pub(crate) fn fingerprint(segments: &[&str]) -> String {
    segments.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_keeps_empty_segments() {
        assert_eq!(fingerprint(&["srv", "acme", ""]), "srv|acme|");
        assert_eq!(fingerprint(&["srv", "acme", "kw"]), "srv|acme|kw");
    }
}
