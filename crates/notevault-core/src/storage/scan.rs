//! Lazy ordered iteration over a snapshot.

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use super::snapshot::Snapshot;

/// Iteration order of a [`Scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Reverse,
}

type KeyPredicate = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Iterator over `(key, value)` pairs of a snapshot.
///
/// The scan owns a reference to the snapshot it started from, so it sees a
/// stable view no matter what commits happen while it is being consumed.
/// Entries are cloned out one at a time; nothing beyond the cursor is
/// materialized.
pub struct Scan {
    snapshot: Arc<Snapshot>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    direction: ScanDirection,
    predicate: Option<KeyPredicate>,
    exhausted: bool,
}

impl Scan {
    pub(crate) fn new(
        snapshot: Arc<Snapshot>,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Self {
        let exhausted = is_empty_range(&lower, &upper);
        Self {
            snapshot,
            lower,
            upper,
            direction,
            predicate: None,
            exhausted,
        }
    }

    /// Scan every key starting with `prefix`.
    pub(crate) fn prefix(snapshot: Arc<Snapshot>, prefix: &[u8], direction: ScanDirection) -> Self {
        Self::new(
            snapshot,
            Bound::Included(prefix.to_vec()),
            prefix_upper_bound(prefix),
            direction,
        )
    }

    /// Only yield entries whose key satisfies `predicate`.
    pub fn filter_keys<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn direction(&self) -> ScanDirection {
        self.direction
    }
}

impl Iterator for Scan {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.exhausted {
            let next = {
                let bounds = (borrow_bound(&self.lower), borrow_bound(&self.upper));
                let mut range = self.snapshot.range::<[u8], _>(bounds);
                let entry = match self.direction {
                    ScanDirection::Forward => range.next(),
                    ScanDirection::Reverse => range.next_back(),
                };
                entry.map(|(key, value)| (key.clone(), value.clone()))
            };

            let Some((key, value)) = next else {
                self.exhausted = true;
                break;
            };

            match self.direction {
                ScanDirection::Forward => self.lower = Bound::Excluded(key.clone()),
                ScanDirection::Reverse => self.upper = Bound::Excluded(key.clone()),
            }

            let keep = match self.predicate.as_mut() {
                Some(predicate) => predicate(&key),
                None => true,
            };
            if keep {
                return Some((key, value));
            }
        }
        None
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("direction", &self.direction)
            .field("filtered", &self.predicate.is_some())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Bound::Excluded(upper);
        }
    }
    Bound::Unbounded
}

fn borrow_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

// BTreeMap::range panics on inverted bounds; treat them as empty instead.
fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        _ => false,
    }
}
