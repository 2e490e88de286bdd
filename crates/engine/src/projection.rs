use std::cmp::Ordering;
use std::collections::BTreeSet;

use pricebook_core::{FieldValue, MergedRow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Search, sort and expansion state for the table. Owns no row data.
#[derive(Debug, Clone, Default)]
pub struct ViewProjection {
    search: String,
    sort: Option<SortKey>,
    expanded: BTreeSet<String>,
}

impl ViewProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_search(&mut self, query: &str) {
        self.search = query.trim().to_lowercase();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_sort(&mut self, sort: Option<SortKey>) {
        self.sort = sort;
    }

    pub fn sort(&self) -> Option<&SortKey> {
        self.sort.as_ref()
    }

    /// Flip expansion for one row. Returns the new state.
    pub fn toggle(&mut self, display_id: &str) -> bool {
        if self.expanded.remove(display_id) {
            false
        } else {
            self.expanded.insert(display_id.to_string());
            true
        }
    }

    pub fn is_expanded(&self, display_id: &str) -> bool {
        self.expanded.contains(display_id)
    }

    pub fn expand_all(&mut self, rows: &[MergedRow]) {
        self.expanded = rows.iter().map(|r| r.display_id.clone()).collect();
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    /// Forget expansion for rows that no longer exist.
    pub fn prune(&mut self, rows: &[MergedRow]) {
        let live: BTreeSet<&str> = rows.iter().map(|r| r.display_id.as_str()).collect();
        self.expanded.retain(|id| live.contains(id.as_str()));
    }

    /// Rows matching the search, in sort order. Without a sort key the
    /// input order is kept.
    pub fn project<'a>(&self, rows: &'a [MergedRow]) -> Vec<&'a MergedRow> {
        let mut visible: Vec<&MergedRow> = rows.iter().filter(|r| self.matches(r)).collect();
        if let Some(sort) = &self.sort {
            visible.sort_by(|a, b| compare(a.get(&sort.field), b.get(&sort.field), sort.direction));
        }
        visible
    }

    fn matches(&self, row: &MergedRow) -> bool {
        if self.search.is_empty() {
            return true;
        }
        row.display_id.to_lowercase().contains(&self.search)
            || row
                .fields
                .values()
                .filter_map(FieldValue::as_text)
                .any(|text| text.to_lowercase().contains(&self.search))
    }
}

/// Unset sorts last in both directions.
fn compare(a: &FieldValue, b: &FieldValue, direction: SortDirection) -> Ordering {
    match (a.is_unset(), b.is_unset()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match direction {
            SortDirection::Ascending => a.sort_cmp(b),
            SortDirection::Descending => b.sort_cmp(a),
        },
    }
}
