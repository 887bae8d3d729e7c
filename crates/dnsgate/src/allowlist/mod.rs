mod parse;
mod store;

use std::collections::HashSet;

pub use parse::parse_allowlist;
pub use store::{AllowListStore, FileAllowListStore, InMemoryAllowListStore, ReloadStatus};

/// Immutable, versioned set of allowed domains.
///
/// A new `AllowList` is built for every reload and published as a whole, so
/// readers never see a partially updated set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: HashSet<String>,
    version: u64,
}

impl AllowList {
    /// Empty list served before the first successful load
    pub fn empty() -> Self {
        Default::default()
    }

    pub fn new<I, S>(entries: I, version: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| normalize_domain(entry.as_ref()))
            .filter(|entry| !entry.is_empty())
            .collect();
        AllowList { entries, version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Whether `domain` or one of its ancestors is listed.
    ///
    /// `www.example.com` is allowed by `example.com`, the reverse is not, and
    /// `example.com.evil.net` never matches `example.com` since only whole
    /// labels are stripped from the left.
    pub fn allows(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return false;
        }

        let mut candidate = domain.as_str();
        loop {
            if self.entries.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return false,
            }
        }
    }

    /// Entries made of a single label, e.g. `com`. Such an entry allows a
    /// whole top-level domain.
    pub fn single_label_entries(&self) -> impl Iterator<Item = &str> {
        self.entries().filter(|entry| !entry.contains('.'))
    }
}

/// Lower-cases and trims a domain, dropping a trailing root dot.
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim();
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    domain.to_ascii_lowercase()
}
