//! Page requests and results for token-paginated list calls

/// One list call's parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub query: Option<String>,
    pub page_token: Option<String>,
    /// Already clamped to the server maximum by the caller
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }
}

/// One page of items plus the continuation token
///
/// Paging continues while `next_page_token` is present, even if `items`
/// is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }

    /// A final page
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}
