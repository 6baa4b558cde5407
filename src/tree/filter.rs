//! Point filters applied during scans.

use std::collections::BTreeSet;

use crate::types::Key;

/// Predicate over keys with an optional page-skipping shortcut.
pub trait PointFilter: Send + Sync {
    fn contains(&self, key: &Key) -> bool;

    /// Return `true` only when no key on a page summarized by `lower` and
    /// `upper` can satisfy `contains`. `lower`/`upper` hold the per-field
    /// minimum and maximum of the page's timestamps and point ids.
    ///
    /// Returning `false` is always correct; it just means the page is read.
    fn page_cannot_contain_points(&self, _lower: &Key, _upper: &Key) -> bool {
        false
    }
}

/// Allow-list of point ids
#[derive(Debug, Clone, Default)]
pub struct PointIdFilter {
    points: BTreeSet<u64>,
}

impl PointIdFilter {
    pub fn new(points: impl IntoIterator<Item = u64>) -> Self {
        Self {
            points: points.into_iter().collect(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = u64> + '_ {
        self.points.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl PointFilter for PointIdFilter {
    fn contains(&self, key: &Key) -> bool {
        self.points.contains(&key.point_id)
    }

    fn page_cannot_contain_points(&self, lower: &Key, upper: &Key) -> bool {
        if lower.point_id > upper.point_id {
            return false;
        }
        self.points.range(lower.point_id..=upper.point_id).next().is_none()
    }
}
