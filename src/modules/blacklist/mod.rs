//! URL blacklist.
//!
//! Plain substring containment against the entries shipped in the static
//! payload. Applied when the target set is loaded and again before every
//! derived fetch, since those URLs come from page content.

/// Immutable set of disallowed substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    entries: Vec<String>,
}

impl Blacklist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.into();
            // An empty needle matches every url.
            if entry.is_empty() || list.contains(&entry) {
                continue;
            }
            list.push(entry);
        }
        Self { entries: list }
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.entries.iter().any(|entry| url.contains(entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
