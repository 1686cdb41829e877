use std::cmp::Ordering;
use std::fmt;

use crate::storage::btree::layout::Layout;

/// Half-open key interval `from <= key < to` a subtree must stay within.
///
/// Ranges only ever narrow. Each one keeps a link to the range it was
/// derived from so a defect can show the whole chain down from the root.
pub struct KeyRange<'a, L: Layout> {
    layout: &'a L,
    from: Option<L::Key>,
    to: Option<L::Key>,
    parent: Option<&'a KeyRange<'a, L>>,
}

impl<'a, L: Layout> KeyRange<'a, L> {
    /// Range admitting every key.
    pub fn open(layout: &'a L) -> Self {
        Self {
            layout,
            from: None,
            to: None,
            parent: None,
        }
    }

    /// Inclusive lower bound.
    pub fn from(&self) -> Option<&L::Key> {
        self.from.as_ref()
    }

    /// Exclusive upper bound.
    pub fn to(&self) -> Option<&L::Key> {
        self.to.as_ref()
    }

    /// True when `key` satisfies both bounds.
    pub fn in_range(&self, key: &L::Key) -> bool {
        let above = self
            .from
            .as_ref()
            .map_or(true, |from| self.layout.compare(key, from) != Ordering::Less);
        let below = self
            .to
            .as_ref()
            .map_or(true, |to| self.layout.compare(key, to) == Ordering::Less);
        above && below
    }

    /// Raises the lower bound to `left` when that is tighter.
    pub fn restrict_left<'b>(&'b self, left: &L::Key) -> KeyRange<'b, L>
    where
        'a: 'b,
    {
        let tighter = self
            .from
            .as_ref()
            .map_or(true, |from| self.layout.compare(from, left) == Ordering::Less);
        KeyRange {
            layout: self.layout,
            from: if tighter { Some(left.clone()) } else { self.from.clone() },
            to: self.to.clone(),
            parent: Some(self),
        }
    }

    /// Lowers the upper bound to `right` when that is tighter.
    pub fn restrict_right<'b>(&'b self, right: &L::Key) -> KeyRange<'b, L>
    where
        'a: 'b,
    {
        let tighter = self
            .to
            .as_ref()
            .map_or(true, |to| self.layout.compare(to, right) == Ordering::Greater);
        KeyRange {
            layout: self.layout,
            from: self.from.clone(),
            to: if tighter { Some(right.clone()) } else { self.to.clone() },
            parent: Some(self),
        }
    }

    fn bound(&self, key: Option<&L::Key>) -> String {
        key.map_or_else(|| "None".to_owned(), |k| self.layout.render(k))
    }
}

impl<L: Layout> fmt::Display for KeyRange<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent {
            writeln!(f, "{parent}")?;
        }
        write!(
            f,
            "{} ≤ key < {}",
            self.bound(self.from.as_ref()),
            self.bound(self.to.as_ref())
        )
    }
}
