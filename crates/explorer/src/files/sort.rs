//! Sorting and pagination of listings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::tree::TreeNode;

/// Recognized sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Case-insensitive name.
    Name,
    /// Size in bytes.
    Size,
    /// Modification time.
    Date,
    /// Directories first, then by extension.
    Type,
}

impl SortKey {
    /// All keys, in their canonical order.
    pub const ALL: [SortKey; 4] = [SortKey::Name, SortKey::Size, SortKey::Date, SortKey::Type];

    /// Parse a query value. Unknown keys yield `None`.
    pub fn parse(value: &str) -> Option<SortKey> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Some(SortKey::Name),
            "size" => Some(SortKey::Size),
            "date" | "time" | "mtime" => Some(SortKey::Date),
            "type" => Some(SortKey::Type),
            _ => None,
        }
    }

    /// Lower-case query name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Date => "date",
            SortKey::Type => "type",
        }
    }

    fn compare(&self, a: &TreeNode, b: &TreeNode) -> Ordering {
        match self {
            SortKey::Name => Ordering::Equal,
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Date => a.modified.cmp(&b.modified),
            SortKey::Type => b
                .is_directory
                .cmp(&a.is_directory)
                .then_with(|| extension(&a.name).cmp(&extension(&b.name))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Parse a query value. Anything but `desc` is ascending.
    pub fn parse(value: &str) -> SortOrder {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    /// Lower-case query name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Sort key plus direction. A missing key keeps enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortSpec {
    /// Key to sort by, if any.
    pub key: Option<SortKey>,
    /// Direction.
    pub order: SortOrder,
}

impl SortSpec {
    /// Create a sort specification.
    pub fn new(key: Option<SortKey>, order: SortOrder) -> Self {
        Self { key, order }
    }

    /// Build from raw query values. Keys that are unknown or missing from
    /// `allowed` degrade to "no sort".
    pub fn from_query(sort: Option<&str>, order: Option<&str>, allowed: &[SortKey]) -> Self {
        let key = sort
            .and_then(SortKey::parse)
            .filter(|key| allowed.contains(key));
        let order = order.map(SortOrder::parse).unwrap_or_default();
        Self { key, order }
    }

    /// Sort `nodes` in place.
    ///
    /// Ties on the key fall back to the case-insensitive name, then the raw
    /// name, then the full path, so the order is total and descending is the
    /// exact reverse of ascending.
    pub fn apply(&self, nodes: &mut [TreeNode]) {
        let Some(key) = self.key else {
            return;
        };

        nodes.sort_by(|a, b| {
            let ordering = key
                .compare(a, b)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.path.cmp(&b.path));
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }
}

fn extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Page request. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    /// 1-based page number.
    pub page: usize,
    /// Entries per page.
    pub page_size: usize,
}

impl PageSpec {
    /// Normalize raw values: pages below 1 become 1, a zero page size
    /// becomes 1.
    pub fn new(page: i64, page_size: usize) -> Self {
        Self {
            page: usize::try_from(page).unwrap_or(0).max(1),
            page_size: page_size.max(1),
        }
    }

    /// Number of pages needed for `total` entries (at least 1).
    pub fn page_count(&self, total: usize) -> usize {
        total.div_ceil(self.page_size).max(1)
    }

    /// Take this page out of `items`. Out-of-range pages are empty.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let start = (self.page - 1).saturating_mul(self.page_size);
        items.into_iter().skip(start).take(self.page_size).collect()
    }
}
