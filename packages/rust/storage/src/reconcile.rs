//! Image set reconciliation.
//!
//! Compares the freshly observed gallery against the product's active image
//! rows and produces the minimal set of writes. Unchanged images keep their
//! row (and its id); nothing is deleted and re-inserted.

use std::collections::{HashMap, HashSet};

use pricewatch_shared::ProductImage;

/// Writes needed to bring stored images in line with an observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDiff {
    /// URLs to insert as new active rows, in first-seen page order.
    pub to_insert: Vec<String>,
    /// Active row ids to soft-delete, ascending.
    pub to_soft_delete: Vec<i64>,
    /// Active URLs present in both sets; left untouched.
    pub unchanged: Vec<String>,
}

impl ImageDiff {
    /// Whether applying this diff would write anything.
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_soft_delete.is_empty()
    }
}

/// Diff `observed` URLs against the `stored_active` rows.
///
/// Duplicate observed URLs collapse to one. Rows in `stored_active` are
/// assumed active; callers pass only active rows.
pub fn diff_images(stored_active: &[ProductImage], observed: &[String]) -> ImageDiff {
    let by_url: HashMap<&str, i64> = stored_active
        .iter()
        .map(|img| (img.image_url.as_str(), img.id))
        .collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(observed.len());
    let mut diff = ImageDiff::default();

    for url in observed {
        if !seen.insert(url.as_str()) {
            continue;
        }
        if by_url.contains_key(url.as_str()) {
            diff.unchanged.push(url.clone());
        } else {
            diff.to_insert.push(url.clone());
        }
    }

    diff.to_soft_delete = by_url
        .iter()
        .filter(|(url, _)| !seen.contains(*url))
        .map(|(_, id)| *id)
        .collect();
    diff.to_soft_delete.sort_unstable();

    diff
}
