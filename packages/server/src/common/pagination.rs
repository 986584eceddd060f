//! Offset pagination for REST list endpoints.

use serde::Deserialize;

/// Default page size when none (or an out-of-range one) is requested.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page a client may ask for.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Raw `?limit=&offset=` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    /// Apply defaults. A limit outside `1..=MAX_PAGE_SIZE` falls back to the
    /// default rather than being clamped; a negative offset becomes zero.
    pub fn validate(self) -> Page {
        let limit = match self.limit {
            Some(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => limit,
            _ => DEFAULT_PAGE_SIZE,
        };
        Page {
            limit,
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// Validated page window, ready for `LIMIT $n OFFSET $m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        PageParams::default().validate()
    }
}

impl Page {
    /// Slice an in-memory list the way the SQL window would.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}
