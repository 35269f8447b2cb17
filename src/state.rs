use crate::domain::Domain;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Difference between two consecutive domain scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl DomainDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    domains: BTreeMap<String, Domain>,
    scanned_at: Option<DateTime<Utc>>,
}

/// Last known renewal set
///
/// Only used to report what changed between cycles; the configuration
/// directory stays the source of truth.
#[derive(Clone, Debug, Default)]
pub struct DomainCache {
    snapshot: Arc<RwLock<Snapshot>>,
}

impl DomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known set and report the difference to the previous one
    pub async fn update(&self, domains: &[Domain]) -> DomainDiff {
        let next: BTreeMap<String, Domain> = domains
            .iter()
            .map(|d| (d.primary.clone(), d.clone()))
            .collect();

        let mut snapshot = self.snapshot.write().await;
        let mut diff = DomainDiff::default();

        for (primary, domain) in &next {
            match snapshot.domains.get(primary) {
                None => diff.added.push(primary.clone()),
                Some(previous) if previous != domain => diff.changed.push(primary.clone()),
                Some(_) => {}
            }
        }
        for primary in snapshot.domains.keys() {
            if !next.contains_key(primary) {
                diff.removed.push(primary.clone());
            }
        }

        snapshot.domains = next;
        snapshot.scanned_at = Some(Utc::now());
        diff
    }

    pub async fn domains(&self) -> Vec<Domain> {
        self.snapshot.read().await.domains.values().cloned().collect()
    }

    pub async fn scanned_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.scanned_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_update_adds_everything() {
        let cache = DomainCache::new();
        assert!(cache.scanned_at().await.is_none());

        let diff = cache.update(&[Domain::new("a.com"), Domain::new("b.com")]).await;
        assert_eq!(diff.added, vec!["a.com", "b.com"]);
        assert!(diff.removed.is_empty());
        assert!(cache.scanned_at().await.is_some());
    }

    #[tokio::test]
    async fn test_update_reports_changes() {
        let cache = DomainCache::new();
        cache.update(&[Domain::new("a.com"), Domain::new("b.com")]).await;

        let mut a = Domain::new("a.com");
        a.optional.push("www.a.com".to_string());
        let diff = cache.update(&[a.clone(), Domain::new("c.com")]).await;

        assert_eq!(diff.added, vec!["c.com"]);
        assert_eq!(diff.removed, vec!["b.com"]);
        assert_eq!(diff.changed, vec!["a.com"]);
        assert_eq!(cache.domains().await, vec![a, Domain::new("c.com")]);
    }

    #[tokio::test]
    async fn test_same_set_is_empty_diff() {
        let cache = DomainCache::new();
        cache.update(&[Domain::new("a.com")]).await;
        assert!(cache.update(&[Domain::new("a.com")]).await.is_empty());
    }
}
