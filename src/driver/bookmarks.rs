//! Causal-consistency bookmarks.
//!
//! A bookmark is a token produced at commit; a session opened with one must
//! observe at least the state that bookmark describes. String form:
//! `bookmark:v1:<database>:<txn_id>`.

use std::collections::HashSet;

const PREFIX: &str = "bookmark";
const VERSION: &str = "v1";

/// A single causal token. Identity is the (database, transaction) pair; the
/// creation timestamp only orders bookmarks, it does not distinguish them.
#[derive(Debug, Clone)]
pub struct Bookmark {
    pub transaction_id: String,
    pub database: String,
    pub timestamp: f64,
}

impl Bookmark {
    pub fn new(transaction_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            database: database.into(),
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Parse the string form. Anything malformed, including a wrong version,
    /// yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(4, ':');
        let prefix = parts.next()?;
        let version = parts.next()?;
        let database = parts.next()?;
        let transaction_id = parts.next()?;
        if prefix != PREFIX || version != VERSION || database.is_empty() || transaction_id.is_empty()
        {
            return None;
        }
        Some(Self {
            transaction_id: transaction_id.to_owned(),
            database: database.to_owned(),
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        })
    }

    pub fn is_newer_than(&self, other: &Bookmark) -> bool {
        self.timestamp > other.timestamp
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PREFIX}:{VERSION}:{}:{}", self.database, self.transaction_id)
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id && self.database == other.database
    }
}

impl Eq for Bookmark {}

impl std::hash::Hash for Bookmark {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.transaction_id.hash(state);
        self.database.hash(state);
    }
}

/// An ordered collection of bookmarks, deduplicated by string form.
#[derive(Debug, Clone, Default)]
pub struct Bookmarks {
    entries: Vec<Bookmark>,
    seen: HashSet<String>,
}

impl Bookmarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from string forms; unparseable entries are dropped.
    pub fn from_strings<S: AsRef<str>>(strings: &[S]) -> Self {
        let mut bookmarks = Self::new();
        for s in strings {
            bookmarks.add_str(s.as_ref());
        }
        bookmarks
    }

    /// Add a bookmark; duplicates are ignored. Returns whether it was new.
    pub fn add(&mut self, bookmark: Bookmark) -> bool {
        if self.seen.insert(bookmark.to_string()) {
            self.entries.push(bookmark);
            true
        } else {
            false
        }
    }

    /// Parse and add a string form. Returns false for malformed input or a
    /// duplicate.
    pub fn add_str(&mut self, text: &str) -> bool {
        match Bookmark::parse(text) {
            Some(bookmark) => self.add(bookmark),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All bookmarks as strings, in insertion order.
    pub fn get_all(&self) -> Vec<String> {
        self.entries.iter().map(Bookmark::to_string).collect()
    }

    /// Newest bookmark for a database.
    pub fn get_latest_by_database(&self, database: &str) -> Option<&Bookmark> {
        self.entries
            .iter()
            .filter(|b| b.database == database)
            .max_by(|a, b| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Union of two collections; neither input is mutated.
    pub fn merge(&self, other: &Bookmarks) -> Bookmarks {
        let mut merged = self.clone();
        for bookmark in &other.entries {
            merged.add(bookmark.clone());
        }
        merged
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bookmark> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Bookmarks {
    type Item = &'a Bookmark;
    type IntoIter = std::slice::Iter<'a, Bookmark>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
