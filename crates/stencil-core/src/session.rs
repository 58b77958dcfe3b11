//
// session.rs
//
// Document ownership tracking per connection.
//

use std::collections::HashSet;

use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

/// Maps documents to their owning connection and back.
///
/// Ownership is claimed lazily: an unregistered document grants access to
/// any connection. Re-registration by a different connection transfers
/// ownership silently (last writer wins). All of a connection's claims are
/// purged en masse on disconnect, including abnormal termination.
#[derive(Debug, Default)]
pub struct SessionTracker {
    owners: DashMap<Url, String>,
    by_connection: DashMap<String, HashSet<Url>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim or re-claim a document for `connection`.
    pub fn register(&self, connection: &str, uri: &Url) {
        if let Some(previous) = self.owners.insert(uri.clone(), connection.to_string()) {
            if previous != connection {
                if let Some(mut owned) = self.by_connection.get_mut(&previous) {
                    owned.remove(uri);
                }
                log::debug!(
                    "ownership of {uri} transferred from '{previous}' to '{connection}'"
                );
            }
        }
        self.by_connection
            .entry(connection.to_string())
            .or_default()
            .insert(uri.clone());
    }

    /// True when the document is unregistered (lazy claim) or owned by
    /// `connection`.
    pub fn validate_access(&self, connection: &str, uri: &Url) -> bool {
        match self.owners.get(uri) {
            Some(owner) => owner.value() == connection,
            None => true,
        }
    }

    /// Remove every document owned by `connection`; returns the URIs that
    /// were released so callers can cancel their pending work.
    pub fn cleanup(&self, connection: &str) -> Vec<Url> {
        let Some((_, owned)) = self.by_connection.remove(connection) else {
            return Vec::new();
        };
        let mut released = Vec::with_capacity(owned.len());
        for uri in owned {
            let removed = self
                .owners
                .remove_if(&uri, |_, owner| owner == connection)
                .is_some();
            if removed {
                released.push(uri);
            }
        }
        released
    }

    pub fn owner_of(&self, uri: &Url) -> Option<String> {
        self.owners.get(uri).map(|o| o.value().clone())
    }

    pub fn document_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///{path}")).unwrap()
    }

    #[test]
    fn test_unregistered_document_allows_any_connection() {
        let sessions = SessionTracker::new();
        assert!(sessions.validate_access("conn-1", &uri("a.stencil")));
        assert!(sessions.validate_access("conn-2", &uri("a.stencil")));
    }

    #[test]
    fn test_registered_owner_passes_others_fail() {
        let sessions = SessionTracker::new();
        let u = uri("a.stencil");
        sessions.register("conn-1", &u);
        assert!(sessions.validate_access("conn-1", &u));
        assert!(!sessions.validate_access("conn-2", &u));
    }

    #[test]
    fn test_reregistration_transfers_ownership() {
        let sessions = SessionTracker::new();
        let u = uri("a.stencil");
        sessions.register("conn-1", &u);
        sessions.register("conn-2", &u);

        assert!(!sessions.validate_access("conn-1", &u));
        assert!(sessions.validate_access("conn-2", &u));
        assert_eq!(sessions.owner_of(&u).as_deref(), Some("conn-2"));

        // The transfer also cleans up the loser's reverse mapping: a later
        // cleanup of conn-1 must not release conn-2's document.
        assert!(sessions.cleanup("conn-1").is_empty());
        assert!(sessions.validate_access("conn-2", &u));
    }

    #[test]
    fn test_cleanup_releases_all_owned_documents() {
        let sessions = SessionTracker::new();
        sessions.register("conn-1", &uri("a.stencil"));
        sessions.register("conn-1", &uri("b.stencil"));
        sessions.register("conn-2", &uri("c.stencil"));

        let mut released = sessions.cleanup("conn-1");
        released.sort_by_key(|u| u.to_string());
        assert_eq!(released.len(), 2);
        assert_eq!(sessions.document_count(), 1);
        assert!(sessions.validate_access("conn-3", &uri("a.stencil")));
    }

    #[test]
    fn test_cleanup_of_unknown_connection_is_noop() {
        let sessions = SessionTracker::new();
        assert!(sessions.cleanup("ghost").is_empty());
    }

    #[test]
    fn test_register_is_idempotent_for_same_connection() {
        let sessions = SessionTracker::new();
        let u = uri("a.stencil");
        sessions.register("conn-1", &u);
        sessions.register("conn-1", &u);
        assert_eq!(sessions.document_count(), 1);
        assert_eq!(sessions.cleanup("conn-1").len(), 1);
    }
}
