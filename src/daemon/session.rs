use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::DaemonError;
use crate::protocol::SessionInfo;

/// Minimum query length for session-id prefix matching.
const MIN_PREFIX_LEN: usize = 4;

/// One attached browser target session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub target_id: String,
    pub url: String,
    pub title: String,
    enabled_domains: HashSet<String>,
    pending_requests: HashMap<String, Instant>,
}

impl Session {
    fn new(id: String, target_id: String, url: String, title: String) -> Self {
        Self {
            id,
            target_id,
            url,
            title,
            enabled_domains: HashSet::new(),
            pending_requests: HashMap::new(),
        }
    }
}

/// The set of attached sessions and which one commands act on.
///
/// One mutex guards everything; the guard is never held across I/O —
/// callers copy out what they need, then talk to the browser.
#[derive(Debug, Default)]
pub struct SessionManager {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    active_id: Option<String>,
    /// Session ids in insertion order; drives promotion after detach.
    order: Vec<String>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly attached target session. The first session becomes
    /// active automatically.
    pub fn on_target_attached(&self, id: &str, target_id: &str, url: &str, title: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.sessions.contains_key(id) {
            return;
        }
        inner.sessions.insert(
            id.to_owned(),
            Session::new(
                id.to_owned(),
                target_id.to_owned(),
                url.to_owned(),
                title.to_owned(),
            ),
        );
        inner.order.push(id.to_owned());
        if inner.active_id.is_none() {
            inner.active_id = Some(id.to_owned());
        }
    }

    /// Drop a detached session. If it was active, the most recently
    /// inserted remaining session is promoted.
    pub fn on_target_detached(&self, id: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.sessions.remove(id).is_none() {
            return;
        }
        inner.order.retain(|s| s != id);
        if inner.active_id.as_deref() == Some(id) {
            inner.active_id = inner.order.last().cloned();
        }
    }

    /// Session id owning `target_id`, if any.
    #[must_use]
    pub fn session_for_target(&self, target_id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("session lock");
        inner
            .sessions
            .values()
            .find(|s| s.target_id == target_id)
            .map(|s| s.id.clone())
    }

    /// Refresh URL/title after a navigation or title change.
    pub fn update_target_info(&self, target_id: &str, url: &str, title: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        for session in inner.sessions.values_mut() {
            if session.target_id == target_id {
                session.url = url.to_owned();
                session.title = title.to_owned();
            }
        }
    }

    /// Switch the active session.
    ///
    /// A session matches by exact id, by id prefix (queries of at least
    /// four characters), or by case-insensitive substring of its URL or
    /// title.
    ///
    /// # Errors
    ///
    /// `AmbiguousTarget` when two or more match (the active session is not
    /// changed), `TargetNotFound` when none do.
    pub fn set_active(&self, query: &str) -> Result<SessionInfo, DaemonError> {
        let mut inner = self.inner.lock().expect("session lock");

        let needle = query.to_lowercase();
        let matches: Vec<String> = inner
            .order
            .iter()
            .filter(|id| {
                let session = &inner.sessions[*id];
                session.id == query
                    || (query.len() >= MIN_PREFIX_LEN && session.id.starts_with(query))
                    || session.url.to_lowercase().contains(&needle)
                    || session.title.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();

        match matches.len() {
            0 => Err(DaemonError::TargetNotFound {
                query: query.to_owned(),
            }),
            1 => {
                let id = matches.into_iter().next().expect("one match");
                inner.active_id = Some(id.clone());
                let session = &inner.sessions[&id];
                let info = SessionInfo {
                    id: session.id.clone(),
                    target_id: session.target_id.clone(),
                    url: session.url.clone(),
                    title: session.title.clone(),
                    active: true,
                };
                Ok(info)
            }
            _ => Err(DaemonError::AmbiguousTarget {
                matches: matches
                    .iter()
                    .map(|id| {
                        let session = &inner.sessions[id];
                        format!("{} ({})", session.title, short_id(&session.id))
                    })
                    .collect(),
            }),
        }
    }

    /// The active session id, if any.
    #[must_use]
    pub fn active_id(&self) -> Option<String> {
        self.inner.lock().expect("session lock").active_id.clone()
    }

    /// Copy of the active session.
    #[must_use]
    pub fn active(&self) -> Option<Session> {
        let inner = self.inner.lock().expect("session lock");
        inner
            .active_id
            .as_ref()
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("session lock").sessions.len()
    }

    /// Drop every session (connection loss, shutdown).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.sessions.clear();
        inner.order.clear();
        inner.active_id = None;
    }

    /// All sessions in insertion order, with the active one flagged.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock().expect("session lock");
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .map(|session| SessionInfo {
                id: session.id.clone(),
                target_id: session.target_id.clone(),
                url: session.url.clone(),
                title: session.title.clone(),
                active: inner.active_id.as_deref() == Some(session.id.as_str()),
            })
            .collect()
    }

    /// Claim domains that still need a CDP enable call for this session.
    ///
    /// The returned domains are marked enabled immediately, so concurrent
    /// callers never emit a duplicate enable. The enable set is monotonic
    /// for the session's lifetime.
    #[must_use]
    pub fn claim_domains(&self, session_id: &str, domains: &[&str]) -> Vec<String> {
        let mut inner = self.inner.lock().expect("session lock");
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Vec::new();
        };
        domains
            .iter()
            .filter(|d| session.enabled_domains.insert((**d).to_owned()))
            .map(|d| (*d).to_owned())
            .collect()
    }

    /// Whether a domain has been enabled on this session.
    #[must_use]
    pub fn domain_enabled(&self, session_id: &str, domain: &str) -> bool {
        let inner = self.inner.lock().expect("session lock");
        inner
            .sessions
            .get(session_id)
            .is_some_and(|s| s.enabled_domains.contains(domain))
    }

    /// Track a network request that has started.
    pub fn pending_insert(&self, session_id: &str, request_id: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session
                .pending_requests
                .insert(request_id.to_owned(), Instant::now());
        }
    }

    /// Untrack a network request that finished or failed.
    pub fn pending_remove(&self, session_id: &str, request_id: &str) {
        let mut inner = self.inner.lock().expect("session lock");
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.pending_requests.remove(request_id);
        }
    }

    /// Number of in-flight network requests on a session.
    #[must_use]
    pub fn pending_count(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().expect("session lock");
        inner
            .sessions
            .get(session_id)
            .map_or(0, |s| s.pending_requests.len())
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(sessions: &[(&str, &str, &str, &str)]) -> SessionManager {
        let mgr = SessionManager::new();
        for (id, target, url, title) in sessions {
            mgr.on_target_attached(id, target, url, title);
        }
        mgr
    }

    #[test]
    fn first_session_becomes_active() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        assert_eq!(mgr.active_id().as_deref(), Some("S1"));
    }

    #[test]
    fn detach_promotes_most_recently_inserted() {
        let mgr = manager_with(&[
            ("S1", "T1", "https://a.test/", "A"),
            ("S2", "T2", "https://b.test/", "B"),
            ("S3", "T3", "https://c.test/", "C"),
        ]);
        assert_eq!(mgr.active_id().as_deref(), Some("S1"));

        mgr.on_target_detached("S1");
        assert_eq!(mgr.active_id().as_deref(), Some("S3"));

        mgr.on_target_detached("S3");
        assert_eq!(mgr.active_id().as_deref(), Some("S2"));

        mgr.on_target_detached("S2");
        assert!(mgr.active_id().is_none());
    }

    #[test]
    fn detach_of_inactive_session_keeps_active() {
        let mgr = manager_with(&[
            ("S1", "T1", "https://a.test/", "A"),
            ("S2", "T2", "https://b.test/", "B"),
        ]);
        mgr.on_target_detached("S2");
        assert_eq!(mgr.active_id().as_deref(), Some("S1"));
    }

    #[test]
    fn duplicate_attach_is_ignored() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        mgr.on_target_attached("S1", "T1", "https://other.test/", "Other");
        assert_eq!(mgr.session_count(), 1);
        assert_eq!(mgr.list()[0].url, "https://a.test/");
    }

    #[test]
    fn set_active_by_unique_title_substring() {
        let mgr = manager_with(&[
            ("SESSIONAAAA", "T1", "https://a.test/", "Example"),
            ("SESSIONBBBB", "T2", "https://b.test/", "Other Page"),
        ]);
        let info = mgr.set_active("other").unwrap();
        assert_eq!(info.id, "SESSIONBBBB");
        assert_eq!(mgr.active_id().as_deref(), Some("SESSIONBBBB"));
    }

    #[test]
    fn set_active_by_id_prefix() {
        let mgr = manager_with(&[
            ("AAAABBBBCCCC", "T1", "https://a.test/", "A"),
            ("DDDDEEEEFFFF", "T2", "https://b.test/", "B"),
        ]);
        let info = mgr.set_active("DDDD").unwrap();
        assert_eq!(info.id, "DDDDEEEEFFFF");
    }

    #[test]
    fn short_prefix_does_not_match_ids() {
        let mgr = manager_with(&[("AAAABBBB", "T1", "https://a.test/", "Thing")]);
        // Three characters: too short for prefix matching, and no
        // URL/title contains "aaa".
        assert!(matches!(
            mgr.set_active("AAA"),
            Err(DaemonError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn ambiguous_query_does_not_change_active() {
        let mgr = manager_with(&[
            ("S1AAAAAA", "T1", "https://a.test/", "Example"),
            ("S2BBBBBB", "T2", "https://b.test/", "Example Two"),
        ]);
        let err = mgr.set_active("Example").unwrap_err();
        match err {
            DaemonError::AmbiguousTarget { matches } => assert_eq!(matches.len(), 2),
            other => panic!("expected AmbiguousTarget, got {other}"),
        }
        assert_eq!(mgr.active_id().as_deref(), Some("S1AAAAAA"));

        let info = mgr.set_active("Example Two").unwrap();
        assert_eq!(info.id, "S2BBBBBB");
    }

    #[test]
    fn clear_drops_everything() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        mgr.clear();
        assert_eq!(mgr.session_count(), 0);
        assert!(mgr.active_id().is_none());
        assert!(mgr.list().is_empty());
    }

    #[test]
    fn claim_domains_is_idempotent() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        let first = mgr.claim_domains("S1", &["Runtime", "Page", "DOM"]);
        assert_eq!(first, vec!["Runtime", "Page", "DOM"]);

        let second = mgr.claim_domains("S1", &["Runtime", "Network"]);
        assert_eq!(second, vec!["Network"]);

        assert!(mgr.domain_enabled("S1", "Network"));
        assert!(!mgr.domain_enabled("S1", "CSS"));
    }

    #[test]
    fn claim_domains_on_unknown_session_is_empty() {
        let mgr = SessionManager::new();
        assert!(mgr.claim_domains("nope", &["Runtime"]).is_empty());
    }

    #[test]
    fn pending_request_tracking() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        mgr.pending_insert("S1", "r1");
        mgr.pending_insert("S1", "r2");
        assert_eq!(mgr.pending_count("S1"), 2);

        mgr.pending_remove("S1", "r1");
        assert_eq!(mgr.pending_count("S1"), 1);

        // Removing twice is harmless.
        mgr.pending_remove("S1", "r1");
        assert_eq!(mgr.pending_count("S1"), 1);

        mgr.pending_remove("S1", "r2");
        assert_eq!(mgr.pending_count("S1"), 0);
    }

    #[test]
    fn update_target_info_refreshes_url_and_title() {
        let mgr = manager_with(&[("S1", "T1", "about:blank", "")]);
        mgr.update_target_info("T1", "https://example.com/", "Example Domain");
        let list = mgr.list();
        assert_eq!(list[0].url, "https://example.com/");
        assert_eq!(list[0].title, "Example Domain");
    }

    #[test]
    fn session_for_target_lookup() {
        let mgr = manager_with(&[("S1", "T1", "https://a.test/", "A")]);
        assert_eq!(mgr.session_for_target("T1").as_deref(), Some("S1"));
        assert!(mgr.session_for_target("T2").is_none());
    }
}
