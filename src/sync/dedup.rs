//! In-memory duplicate detector for one sync run.
//!
//! Loaded from the user's applications received within the last 14 days and
//! owned and mutated exclusively by the writer thread. Detects "same company,
//! similar title" duplicates for application-like classes; the provider-id
//! unique index handles exact message duplicates separately.

use chrono::{Duration, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::{HashMap, HashSet};

use crate::storage::applications;

pub const DUPLICATE_WINDOW_DAYS: i64 = 14;

/// Map of `company_key → set(title_key)`. The empty string stands in for
/// applications recorded without a title.
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    companies: HashMap<String, HashSet<String>>,
}

fn company_key(company: &str) -> Option<String> {
    let key = company.trim().to_lowercase();
    if key.is_empty() || key == "unknown" {
        return None;
    }
    Some(key)
}

fn title_key(title: Option<&str>) -> String {
    title.map(|t| t.trim().to_lowercase()).unwrap_or_default()
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the detector with the user's recent applications.
    pub async fn load(pool: &PgPool, user_id: i32) -> Result<Self, sqlx::Error> {
        let since = Utc::now() - Duration::days(DUPLICATE_WINDOW_DAYS);
        let rows = applications::recent_company_titles(pool, user_id, since).await?;

        let mut detector = Self::new();
        for (company, title) in rows {
            detector.record(&company, title.as_deref());
        }

        log::debug!(
            "duplicate detector loaded with {} companies for user {}",
            detector.companies.len(),
            user_id
        );
        Ok(detector)
    }

    /// True when this (company, title) pair matches a recent application:
    /// the title matches a cached one, an untitled application exists for the
    /// company, or the incoming title is empty and the company has any entry.
    pub fn is_duplicate(&self, company: &str, title: Option<&str>) -> bool {
        let Some(company_key) = company_key(company) else {
            return false;
        };
        let Some(titles) = self.companies.get(&company_key) else {
            return false;
        };

        let title_key = title_key(title);
        if title_key.is_empty() {
            return !titles.is_empty();
        }
        titles.contains(&title_key) || titles.contains("")
    }

    /// Record a newly created application so later messages in the same sync
    /// are deduplicated too.
    pub fn record(&mut self, company: &str, title: Option<&str>) {
        let Some(company_key) = company_key(company) else {
            return;
        };
        self.companies
            .entry(company_key)
            .or_default()
            .insert(title_key(title));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_company_same_title_is_duplicate() {
        let mut d = DuplicateDetector::new();
        d.record("Acme", Some("Senior Engineer"));
        assert!(d.is_duplicate("Acme", Some("Senior Engineer")));
        assert!(d.is_duplicate("acme", Some("senior engineer")), "case-insensitive");
    }

    #[test]
    fn different_title_is_not_duplicate() {
        let mut d = DuplicateDetector::new();
        d.record("Acme", Some("Senior Engineer"));
        assert!(!d.is_duplicate("Acme", Some("Staff Engineer")));
    }

    #[test]
    fn untitled_cached_application_matches_any_title() {
        let mut d = DuplicateDetector::new();
        d.record("Acme", None);
        assert!(d.is_duplicate("Acme", Some("Senior Engineer")));
        assert!(d.is_duplicate("Acme", None));
    }

    #[test]
    fn empty_incoming_title_matches_when_company_has_entries() {
        let mut d = DuplicateDetector::new();
        d.record("Acme", Some("Senior Engineer"));
        assert!(d.is_duplicate("Acme", None));
    }

    #[test]
    fn unknown_company_never_matches() {
        let mut d = DuplicateDetector::new();
        d.record("Unknown", Some("Engineer"));
        assert!(!d.is_duplicate("Unknown", Some("Engineer")));
        assert!(!d.is_duplicate("", Some("Engineer")));
    }

    #[test]
    fn other_company_is_not_duplicate() {
        let mut d = DuplicateDetector::new();
        d.record("Acme", Some("Engineer"));
        assert!(!d.is_duplicate("Globex", Some("Engineer")));
    }
}
