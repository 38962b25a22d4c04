pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// 1-based page selection, as sent by clients in the query string
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl PageRequest {
    pub fn new(page: u64, page_size: u64) -> PageRequest {
        PageRequest {
            page: Some(page),
            page_size: Some(page_size),
        }
    }

    pub fn page(&self) -> u64 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    pub fn skip(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.page_size())
    }

    /// Whether `total` matches leave something for the page after this one
    pub fn is_next(&self, total: u64) -> bool {
        total > self.page().saturating_mul(self.page_size())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: String,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl SearchRequest {
    pub fn paging(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            page_size: self.page_size,
        }
    }

    pub fn needle(&self) -> String {
        self.q.trim().to_string()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub is_next: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserQuery {
    /// Case-insensitive substring of the username or name, empty matches everyone
    pub needle: String,
    pub exclude_external_id: Option<String>,
    pub skip: u64,
    pub limit: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommunityQuery {
    /// Case-insensitive substring of the slug or name, empty matches everything
    pub needle: String,
    pub skip: u64,
    pub limit: u64,
}

/// Reference semantics of search needles, for backends that filter in memory
pub fn matches_needle(needle: &str, candidates: &[&str]) -> bool {
    if needle.trim().is_empty() {
        return true;
    }
    let needle = needle.to_lowercase();
    candidates
        .iter()
        .any(|c| c.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = PageRequest::default();
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(p.skip(), 0);
    }

    #[test]
    fn zero_is_treated_as_unset() {
        let p = PageRequest::new(0, 0);
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn page_size_is_capped() {
        assert_eq!(PageRequest::new(1, 10_000).page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn skip_and_next() {
        let p = PageRequest::new(3, 10);
        assert_eq!(p.skip(), 20);
        assert!(!p.is_next(30));
        assert!(p.is_next(31));
        assert!(!PageRequest::new(1, 20).is_next(20));
    }

    #[test]
    fn huge_pages_do_not_overflow() {
        let p = PageRequest::new(u64::MAX, MAX_PAGE_SIZE);
        assert_eq!(p.skip(), u64::MAX);
        assert!(!p.is_next(u64::MAX));
    }

    #[test]
    fn needles() {
        assert!(matches_needle("", &["anything"]));
        assert!(matches_needle("   ", &[]));
        assert!(matches_needle("LIC", &["alice", "Alice Liddell"]));
        assert!(matches_needle("lid", &["alice", "Alice Liddell"]));
        assert!(!matches_needle("bob", &["alice", "Alice Liddell"]));
    }

    #[test]
    fn search_needle_is_trimmed() {
        let s = SearchRequest {
            q: String::from("  rust "),
            page: None,
            page_size: Some(5),
        };
        assert_eq!(s.needle(), "rust");
        assert_eq!(s.paging().page_size(), 5);
    }
}
