//! Cursor-based pagination helpers for list queries.
//!
//! Cursors are opaque base64-encoded UUIDs. Entity IDs are UUIDv7, so the ID
//! itself provides a stable chronological sort key and no separate ordering
//! column is needed.
//!
//! # Usage
//!
//! ```rust,ignore
//! // In a list query handler
//! let args = PageArgs::forward(20, None).validate()?;
//!
//! // Stores fetch `args.fetch_limit()` rows (limit + 1) so the extra row
//! // reveals whether a next page exists.
//! let rows = db.list_tenants(args.cursor, args.fetch_limit());
//!
//! let page = Page::from_rows(rows, &args, |t| t.id().into_uuid());
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Page size applied when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i32 = 20;

/// Upper bound on the page size a caller may request.
pub const MAX_PAGE_SIZE: i32 = 100;

// ============================================================================
// Cursor
// ============================================================================

/// Opaque cursor for pagination (base64-encoded UUID).
#[derive(Debug, Clone)]
pub struct Cursor(Uuid);

impl Cursor {
    /// Create a cursor from a UUID.
    pub fn new(id: Uuid) -> Self {
        Cursor(id)
    }

    /// Encode the cursor as a base64 string.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Encode a UUID directly to a cursor string.
    pub fn encode_uuid(id: Uuid) -> String {
        Cursor::new(id).encode()
    }

    /// Decode a cursor string back to a Cursor.
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("Invalid cursor: not valid base64")?;
        let uuid = Uuid::from_slice(&bytes).context("Invalid cursor: not a valid UUID")?;
        Ok(Cursor(uuid))
    }

    /// Get the underlying UUID.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

// ============================================================================
// Page arguments
// ============================================================================

/// Caller-supplied arguments for forward pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageArgs {
    /// Returns the first n elements from the list.
    pub first: Option<i32>,
    /// Returns elements that come after the specified cursor.
    pub after: Option<String>,
}

impl PageArgs {
    /// Create pagination args for the first `first` items after `after`.
    pub fn forward(first: i32, after: Option<String>) -> Self {
        PageArgs {
            first: Some(first),
            after,
        }
    }

    /// Validate pagination arguments.
    ///
    /// Applies the default page size, clamps to `1..=MAX_PAGE_SIZE`, and
    /// decodes the cursor.
    pub fn validate(&self) -> Result<ValidatedPageArgs, &'static str> {
        let limit = self.first.unwrap_or(DEFAULT_PAGE_SIZE);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let cursor = self
            .after
            .as_ref()
            .map(|c| Cursor::decode(c))
            .transpose()
            .map_err(|_| "Invalid cursor")?
            .map(|c| c.into_uuid());

        Ok(ValidatedPageArgs { limit, cursor })
    }
}

/// Validated and normalized pagination arguments.
#[derive(Debug, Clone)]
pub struct ValidatedPageArgs {
    /// Number of items to return (1 to `MAX_PAGE_SIZE`, default
    /// `DEFAULT_PAGE_SIZE`).
    pub limit: i32,
    /// Exclusive lower bound: items strictly after this ID.
    pub cursor: Option<Uuid>,
}

impl ValidatedPageArgs {
    /// Number of rows a store should fetch (limit + 1 to detect a next page).
    pub fn fetch_limit(&self) -> usize {
        (self.limit + 1) as usize
    }
}

// ============================================================================
// Page
// ============================================================================

/// One page of results plus enough state to ask for the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page, oldest first.
    pub items: Vec<T>,
    /// Whether another page exists after `end_cursor`.
    pub has_next: bool,
    /// Cursor of the last item, for the next request's `after`.
    pub end_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A page with no items.
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            has_next: false,
            end_cursor: None,
        }
    }

    /// Build a page from rows fetched with [`ValidatedPageArgs::fetch_limit`].
    ///
    /// Trims the extra row, derives `has_next` from its presence, and encodes
    /// the end cursor from the last remaining item.
    pub fn from_rows(
        rows: Vec<T>,
        args: &ValidatedPageArgs,
        cursor_of: impl Fn(&T) -> Uuid,
    ) -> Self {
        let (items, has_next) = trim_results(rows, args.limit);
        let end_cursor = items.last().map(|item| Cursor::encode_uuid(cursor_of(item)));
        Page {
            items,
            has_next,
            end_cursor,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Trim results to the requested limit and determine if there are more.
///
/// Stores fetch `limit + 1` items; this trims to the actual limit and returns
/// whether the extra item was present.
pub fn trim_results<T>(results: Vec<T>, limit: i32) -> (Vec<T>, bool) {
    let has_more = results.len() > limit as usize;
    let results = if has_more {
        results.into_iter().take(limit as usize).collect()
    } else {
        results
    };
    (results, has_more)
}
