use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

/// Default number of items fetched per page when enumerating a store.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A request for one page of an enumeration.
///
/// `cursor` is opaque to callers: it is whatever the previous page returned
/// as `next_cursor`, or `None` for the first page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit: limit.max(1),
        }
    }

    pub fn after(cursor: impl Into<String>, limit: usize) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit: limit.max(1),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page, `None` once the enumeration is exhausted.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Encode a key as an opaque cursor for stores that page by key order.
pub fn encode_key_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a cursor produced by [`encode_key_cursor`].
pub fn decode_key_cursor(cursor: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    String::from_utf8(bytes).ok()
}

/// Slice a sorted sequence of keyed items into one page.
///
/// Items must already be ordered by key ascending. Items with a key at or
/// before the cursor are skipped.
pub fn paginate_sorted<T>(
    items: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> &str,
    request: &PageRequest,
) -> Page<T> {
    let after = request.cursor.as_deref().and_then(decode_key_cursor);
    let limit = request.limit.max(1);

    let mut page: Vec<T> = items
        .into_iter()
        .filter(|item| after.as_deref().is_none_or(|a| key(item) > a))
        .take(limit + 1)
        .collect();

    let has_more = page.len() > limit;
    if has_more {
        page.pop();
    }

    let next_cursor = if has_more {
        page.last().map(|item| encode_key_cursor(key(item)))
    } else {
        None
    };

    Page {
        items: page,
        next_cursor,
    }
}
