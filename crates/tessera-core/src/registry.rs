//! Array-backed, always-sorted, unique-by-comparator container.
//!
//! [`SortedRegistry`] keeps its elements in a `Vec` in strictly ascending
//! order under an injected comparator. Two elements that compare
//! [`Ordering::Equal`] are considered the same key even if they differ by
//! value, so at most one of them is ever stored.
//!
//! Point operations binary-search the backing vector (`O(log n)` search plus an
//! `O(n)` shift). Bulk set operations ([`union_with`](SortedRegistry::union_with),
//! [`intersect_with`](SortedRegistry::intersect_with),
//! [`except_with`](SortedRegistry::except_with), [`diff`](SortedRegistry::diff))
//! are single-pass merge-joins over two ascending sequences and rebuild the
//! backing vector instead of re-sorting it.
//!
//! # Example
//!
//! ```
//! use tessera_core::registry::SortedRegistry;
//!
//! let mut reg = SortedRegistry::new();
//! for id in [5u32, 1, 3] {
//!     assert!(reg.try_insert(id));
//! }
//! assert_eq!(reg.as_slice(), &[1, 3, 5]);
//! assert!(!reg.try_insert(3));
//!
//! reg.remove(&3);
//! let found = reg.find_all(&[1u32, 5], |k, item| k.cmp(item));
//! assert_eq!(found, vec![&1, &5]);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::Index;

use crate::RegistryError;

/// Comparator type used by [`SortedRegistry::new`] for `T: Ord`.
pub type OrdFn<T> = fn(&T, &T) -> Ordering;

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Result of [`SortedRegistry::diff`].
///
/// Every key of the registry and of the external sequence lands in exactly one
/// group.
#[derive(Debug)]
pub struct Diff<'a, 'b, T, U> {
    /// Elements present only in the external sequence.
    pub added: Vec<&'b U>,
    /// Elements present only in the registry.
    pub removed: Vec<&'a T>,
    /// Keys present on both sides, paired `(registry, external)`.
    pub existing: Vec<(&'a T, &'b U)>,
}

impl<'a, 'b, T, U> Diff<'a, 'b, T, U> {
    /// Whether both sides hold exactly the same keys.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Split `existing` into `(unchanged, updated)` pairs under `same`.
    pub fn split_existing(
        &self,
        same: impl Fn(&T, &U) -> bool,
    ) -> (Vec<(&'a T, &'b U)>, Vec<(&'a T, &'b U)>) {
        self.existing.iter().copied().partition(|&(old, new)| same(old, new))
    }
}

// ---------------------------------------------------------------------------
// Merge-join
// ---------------------------------------------------------------------------

enum MergeStep<T> {
    Left(T),
    Right(T),
    Both(T, T),
}

/// Walk two ascending vectors in lockstep, emitting each key once.
fn merge_join<T>(
    left: Vec<T>,
    right: Vec<T>,
    cmp: &impl Fn(&T, &T) -> Ordering,
    mut emit: impl FnMut(MergeStep<T>),
) {
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let order = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => cmp(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => {
                if let Some(a) = left.next() {
                    emit(MergeStep::Left(a));
                }
            }
            Ordering::Greater => {
                if let Some(b) = right.next() {
                    emit(MergeStep::Right(b));
                }
            }
            Ordering::Equal => {
                if let (Some(a), Some(b)) = (left.next(), right.next()) {
                    emit(MergeStep::Both(a, b));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SortedRegistry
// ---------------------------------------------------------------------------

/// A sorted, duplicate-free sequence under a comparator.
///
/// After every public call returns, elements are in strictly ascending
/// comparator order and no two elements compare equal.
#[derive(Clone)]
pub struct SortedRegistry<T, C = OrdFn<T>> {
    items: Vec<T>,
    cmp: C,
}

impl<T: Ord> SortedRegistry<T> {
    /// Create an empty registry ordered by `T`'s [`Ord`] implementation.
    pub fn new() -> Self {
        Self::with_comparator(T::cmp as OrdFn<T>)
    }
}

impl<T: Ord> Default for SortedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> SortedRegistry<T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    /// Create an empty registry ordered by `cmp`.
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            items: Vec::new(),
            cmp,
        }
    }

    /// Build a registry from unsorted items.
    ///
    /// Items are sorted; of several items with the same key only the first
    /// one (in input order) is kept.
    pub fn from_vec(mut items: Vec<T>, cmp: C) -> Self {
        items.sort_by(&cmp);
        items.dedup_by(|later, earlier| cmp(&*later, &*earlier) == Ordering::Equal);
        Self { items, cmp }
    }

    /// The comparator this registry is ordered by.
    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    // -- size / access ------------------------------------------------------

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Smallest element.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Largest element.
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// The backing slice, in ascending order.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Consume the registry, returning the sorted backing vector.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Keep only the elements for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    // -- binary search ------------------------------------------------------

    fn search(&self, item: &T) -> Result<usize, usize> {
        self.items.binary_search_by(|probe| (self.cmp)(probe, item))
    }

    fn search_key<K: ?Sized>(
        &self,
        key: &K,
        cmp: impl Fn(&K, &T) -> Ordering,
    ) -> Result<usize, usize> {
        self.items
            .binary_search_by(|probe| cmp(key, probe).reverse())
    }

    /// Index of the element with the same key as `item`.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.search(item).ok()
    }

    /// Index of the element matching `key` under a key-to-element comparator.
    pub fn index_of_key<K: ?Sized>(
        &self,
        key: &K,
        cmp: impl Fn(&K, &T) -> Ordering,
    ) -> Option<usize> {
        self.search_key(key, cmp).ok()
    }

    /// The stored element with the same key as `item`.
    pub fn find(&self, item: &T) -> Option<&T> {
        self.index_of(item).map(|i| &self.items[i])
    }

    /// The stored element matching `key`.
    pub fn find_by_key<K: ?Sized>(
        &self,
        key: &K,
        cmp: impl Fn(&K, &T) -> Ordering,
    ) -> Option<&T> {
        self.index_of_key(key, cmp).map(|i| &self.items[i])
    }

    /// Whether an element with the same key as `item` is stored.
    pub fn contains(&self, item: &T) -> bool {
        self.search(item).is_ok()
    }

    /// Every stored element whose key appears in `sorted_keys`.
    ///
    /// `sorted_keys` must be ascending under `cmp`. This is a two-pointer
    /// merge-join, `O(n + m)`.
    pub fn find_all<K>(&self, sorted_keys: &[K], cmp: impl Fn(&K, &T) -> Ordering) -> Vec<&T> {
        let mut found = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.items.len() && j < sorted_keys.len() {
            match cmp(&sorted_keys[j], &self.items[i]) {
                Ordering::Greater => i += 1,
                Ordering::Less => j += 1,
                Ordering::Equal => {
                    found.push(&self.items[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        found
    }

    // -- point mutation -----------------------------------------------------

    /// Insert `item` at its sorted position.
    ///
    /// Returns `false` without modifying the registry if an element with the
    /// same key already exists.
    pub fn try_insert(&mut self, item: T) -> bool {
        match self.search(&item) {
            Ok(_) => false,
            Err(slot) => {
                self.items.insert(slot, item);
                true
            }
        }
    }

    /// Insert `item` at its sorted position, returning that position.
    pub fn insert(&mut self, item: T) -> Result<usize, RegistryError> {
        match self.search(&item) {
            Ok(index) => Err(RegistryError::DuplicateKey { index }),
            Err(slot) => {
                self.items.insert(slot, item);
                Ok(slot)
            }
        }
    }

    /// Remove the element with the same key as `item`, if present.
    pub fn remove(&mut self, item: &T) -> Option<T> {
        self.search(item).ok().map(|i| self.items.remove(i))
    }

    /// Remove the element with the same key as `item`, failing if absent.
    pub fn take(&mut self, item: &T) -> Result<T, RegistryError> {
        self.remove(item).ok_or(RegistryError::NotFound)
    }

    /// Remove the element matching `key`, if present.
    pub fn remove_by_key<K: ?Sized>(
        &mut self,
        key: &K,
        cmp: impl Fn(&K, &T) -> Ordering,
    ) -> Option<T> {
        self.search_key(key, cmp).ok().map(|i| self.items.remove(i))
    }

    /// Remove and return the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn remove_at(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    /// Remove every element whose key lies within `[low, high]`.
    ///
    /// The bounds may be given in either order. Returns the removed elements
    /// in ascending order.
    pub fn remove_range_by_key<K: ?Sized>(
        &mut self,
        low: &K,
        high: &K,
        cmp: impl Fn(&K, &T) -> Ordering,
    ) -> Vec<T> {
        let below = |k: &K| self.items.partition_point(|t| cmp(k, t) == Ordering::Greater);
        let up_to = |k: &K| self.items.partition_point(|t| cmp(k, t) != Ordering::Less);
        let (mut start, mut end) = (below(low), up_to(high));
        if start > end {
            start = below(high);
            end = up_to(low);
        }
        self.items.drain(start..end).collect()
    }

    /// Replace the element at `index` and move it to restore the order.
    ///
    /// The new value travels left or right by adjacent swaps until both of
    /// its neighbours are in order. If it would collide with another element
    /// of the same key, [`RegistryError::DuplicateKey`] is returned and the
    /// registry is left untouched. Returns the replaced element.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_at(&mut self, index: usize, value: T) -> Result<T, RegistryError> {
        assert!(
            index < self.items.len(),
            "set_at index {index} out of range (len {})",
            self.items.len()
        );

        let mut dest = index;
        while dest > 0 {
            match (self.cmp)(&value, &self.items[dest - 1]) {
                Ordering::Less => dest -= 1,
                Ordering::Equal => return Err(RegistryError::DuplicateKey { index: dest - 1 }),
                Ordering::Greater => break,
            }
        }
        if dest == index {
            while dest + 1 < self.items.len() {
                match (self.cmp)(&value, &self.items[dest + 1]) {
                    Ordering::Greater => dest += 1,
                    Ordering::Equal => {
                        return Err(RegistryError::DuplicateKey { index: dest + 1 })
                    }
                    Ordering::Less => break,
                }
            }
        }

        let old = std::mem::replace(&mut self.items[index], value);
        if dest < index {
            self.items[dest..=index].rotate_right(1);
        } else if dest > index {
            self.items[index..=dest].rotate_left(1);
        }
        Ok(old)
    }

    // -- bulk set algebra ---------------------------------------------------

    fn normalize(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut items: Vec<T> = items.into_iter().collect();
        items.sort_by(&self.cmp);
        items.dedup_by(|later, earlier| (self.cmp)(&*later, &*earlier) == Ordering::Equal);
        items
    }

    /// Merge `items` into the registry.
    ///
    /// Keys already present keep the stored element. Returns the elements
    /// that were actually added, in ascending order.
    pub fn union_with(&mut self, items: impl IntoIterator<Item = T>) -> Vec<T>
    where
        T: Clone,
    {
        let incoming = self.normalize(items);
        let current = std::mem::take(&mut self.items);
        let mut merged = Vec::with_capacity(current.len() + incoming.len());
        let mut added = Vec::new();
        merge_join(current, incoming, &self.cmp, |step| match step {
            MergeStep::Left(a) | MergeStep::Both(a, _) => merged.push(a),
            MergeStep::Right(b) => {
                added.push(b.clone());
                merged.push(b);
            }
        });
        self.items = merged;
        added
    }

    /// Keep only the elements whose key appears in `items`.
    ///
    /// Returns the elements that were dropped.
    pub fn intersect_with(&mut self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let incoming = self.normalize(items);
        let current = std::mem::take(&mut self.items);
        let mut kept = Vec::with_capacity(current.len().min(incoming.len()));
        let mut dropped = Vec::new();
        merge_join(current, incoming, &self.cmp, |step| match step {
            MergeStep::Both(a, _) => kept.push(a),
            MergeStep::Left(a) => dropped.push(a),
            MergeStep::Right(_) => {}
        });
        self.items = kept;
        dropped
    }

    /// Remove every element whose key appears in `items`.
    ///
    /// Survivors keep their relative order. Returns the removed elements.
    pub fn except_with(&mut self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let incoming = self.normalize(items);
        let current = std::mem::take(&mut self.items);
        let mut kept = Vec::with_capacity(current.len());
        let mut removed = Vec::new();
        merge_join(current, incoming, &self.cmp, |step| match step {
            MergeStep::Left(a) => kept.push(a),
            MergeStep::Both(a, _) => removed.push(a),
            MergeStep::Right(_) => {}
        });
        self.items = kept;
        removed
    }

    /// Merge a set of new elements that must not share any key with the
    /// registry.
    ///
    /// On a collision [`RegistryError::DuplicateKey`] is returned (with the
    /// registry index of the clashing element) and nothing is inserted.
    pub fn merge(&mut self, items: impl IntoIterator<Item = T>) -> Result<(), RegistryError> {
        let incoming = self.normalize(items);
        let (mut i, mut j) = (0, 0);
        while i < self.items.len() && j < incoming.len() {
            match (self.cmp)(&self.items[i], &incoming[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => return Err(RegistryError::DuplicateKey { index: i }),
            }
        }
        let current = std::mem::take(&mut self.items);
        let mut merged = Vec::with_capacity(current.len() + incoming.len());
        merge_join(current, incoming, &self.cmp, |step| match step {
            MergeStep::Left(a) | MergeStep::Right(a) => merged.push(a),
            MergeStep::Both(a, b) => {
                merged.push(a);
                merged.push(b);
            }
        });
        self.items = merged;
        Ok(())
    }

    /// Partition the registry against an external ascending sequence.
    ///
    /// `others` must be ascending under `cmp` (registry element vs external
    /// element). Runs in `O(n + m)`.
    pub fn diff<'a, 'b, U>(
        &'a self,
        others: &'b [U],
        cmp: impl Fn(&T, &U) -> Ordering,
    ) -> Diff<'a, 'b, T, U> {
        let mut diff = Diff {
            added: Vec::new(),
            removed: Vec::new(),
            existing: Vec::new(),
        };
        let (mut i, mut j) = (0, 0);
        while i < self.items.len() && j < others.len() {
            match cmp(&self.items[i], &others[j]) {
                Ordering::Less => {
                    diff.removed.push(&self.items[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    diff.added.push(&others[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    diff.existing.push((&self.items[i], &others[j]));
                    i += 1;
                    j += 1;
                }
            }
        }
        diff.removed.extend(self.items[i..].iter());
        diff.added.extend(others[j..].iter());
        diff
    }
}

impl<T, C> Index<usize> for SortedRegistry<T, C> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T, C> IntoIterator for &'a SortedRegistry<T, C> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug, C> fmt::Debug for SortedRegistry<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: u32,
        label: &'static str,
    }

    fn item(key: u32, label: &'static str) -> Item {
        Item { key, label }
    }

    fn by_key(a: &Item, b: &Item) -> Ordering {
        a.key.cmp(&b.key)
    }

    fn key_cmp(k: &u32, t: &Item) -> Ordering {
        k.cmp(&t.key)
    }

    fn keyed(keys: &[u32]) -> SortedRegistry<Item, fn(&Item, &Item) -> Ordering> {
        SortedRegistry::from_vec(
            keys.iter().map(|&k| item(k, "base")).collect(),
            by_key as fn(&Item, &Item) -> Ordering,
        )
    }

    fn keys<C>(reg: &SortedRegistry<Item, C>) -> Vec<u32> {
        reg.into_iter().map(|i| i.key).collect()
    }

    #[test]
    fn insert_find_remove_scenario() {
        let mut reg = SortedRegistry::new();
        for id in [5u32, 1, 3] {
            assert!(reg.try_insert(id));
        }
        assert_eq!(reg.as_slice(), &[1, 3, 5]);
        assert_eq!(reg.remove(&3), Some(3));
        assert_eq!(reg.as_slice(), &[1, 5]);
        assert_eq!(reg.find_all(&[1u32, 5], |k, t| k.cmp(t)), vec![&1, &5]);
    }

    #[test]
    fn try_insert_equal_key_is_rejected() {
        let mut reg = keyed(&[1, 2, 3]);
        assert!(!reg.try_insert(item(2, "other")));
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.find_by_key(&2, key_cmp).unwrap().label, "base");
    }

    #[test]
    fn insert_reports_duplicate_key() {
        let mut reg = keyed(&[10, 20]);
        assert_eq!(reg.insert(item(15, "x")).unwrap(), 1);
        assert!(matches!(
            reg.insert(item(20, "y")),
            Err(RegistryError::DuplicateKey { index: 2 })
        ));
    }

    #[test]
    fn take_missing_is_not_found() {
        let mut reg = keyed(&[1]);
        assert!(matches!(reg.take(&item(9, "")), Err(RegistryError::NotFound)));
        assert_eq!(reg.take(&item(1, "")).unwrap().key, 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn from_vec_keeps_first_duplicate() {
        let reg = SortedRegistry::from_vec(
            vec![item(3, "a"), item(1, "b"), item(3, "c")],
            by_key,
        );
        assert_eq!(keys(&reg), vec![1, 3]);
        assert_eq!(reg[1].label, "a");
    }

    #[test]
    fn lookups_by_key() {
        let reg = keyed(&[2, 4, 6, 8]);
        assert_eq!(reg.index_of_key(&6, key_cmp), Some(2));
        assert_eq!(reg.index_of_key(&5, key_cmp), None);
        assert_eq!(reg.index_of(&item(8, "")), Some(3));
        assert!(reg.contains(&item(2, "")));
        assert!(reg.find(&item(3, "")).is_none());
    }

    #[test]
    fn remove_by_key_and_at() {
        let mut reg = keyed(&[1, 2, 3]);
        assert_eq!(reg.remove_by_key(&2, key_cmp).unwrap().key, 2);
        assert!(reg.remove_by_key(&2, key_cmp).is_none());
        assert_eq!(reg.remove_at(0).key, 1);
        assert_eq!(keys(&reg), vec![3]);
    }

    #[test]
    fn find_all_skips_missing_keys() {
        let reg = keyed(&[1, 3, 5, 7]);
        let found: Vec<u32> = reg
            .find_all(&[0, 3, 4, 7, 9], key_cmp)
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(found, vec![3, 7]);
    }

    #[test]
    fn set_at_moves_left() {
        let mut reg = keyed(&[1, 3, 5, 7]);
        let old = reg.set_at(3, item(2, "moved")).unwrap();
        assert_eq!(old.key, 7);
        assert_eq!(keys(&reg), vec![1, 2, 3, 5]);
        assert_eq!(reg[1].label, "moved");
    }

    #[test]
    fn set_at_moves_right() {
        let mut reg = keyed(&[1, 3, 5, 7]);
        reg.set_at(0, item(6, "moved")).unwrap();
        assert_eq!(keys(&reg), vec![3, 5, 6, 7]);
        assert_eq!(reg[2].label, "moved");
    }

    #[test]
    fn set_at_same_key_replaces_in_place() {
        let mut reg = keyed(&[1, 3, 5]);
        reg.set_at(1, item(3, "new")).unwrap();
        assert_eq!(keys(&reg), vec![1, 3, 5]);
        assert_eq!(reg[1].label, "new");
    }

    #[test]
    fn set_at_collision_leaves_registry_untouched() {
        let mut reg = keyed(&[1, 3, 5, 7]);
        assert!(matches!(
            reg.set_at(0, item(5, "clash")),
            Err(RegistryError::DuplicateKey { index: 2 })
        ));
        assert_eq!(keys(&reg), vec![1, 3, 5, 7]);
        assert!(reg.iter().all(|i| i.label == "base"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_at_out_of_range_panics() {
        let mut reg = keyed(&[1]);
        let _ = reg.set_at(4, item(2, ""));
    }

    #[test]
    fn union_returns_added_and_keeps_existing() {
        let mut reg = keyed(&[1, 3, 5]);
        let added = reg.union_with(vec![item(4, "new"), item(3, "dup"), item(0, "new")]);
        assert_eq!(keys(&reg), vec![0, 1, 3, 4, 5]);
        assert_eq!(added.iter().map(|i| i.key).collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(reg.find_by_key(&3, key_cmp).unwrap().label, "base");
    }

    #[test]
    fn intersect_keeps_common_keys() {
        let mut reg = keyed(&[1, 2, 3, 4]);
        let dropped = reg.intersect_with(vec![item(4, ""), item(2, ""), item(9, "")]);
        assert_eq!(keys(&reg), vec![2, 4]);
        assert_eq!(dropped.iter().map(|i| i.key).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn except_removes_common_keys() {
        let mut reg = keyed(&[1, 2, 3, 4, 5]);
        let removed = reg.except_with(vec![item(4, ""), item(2, ""), item(8, "")]);
        assert_eq!(keys(&reg), vec![1, 3, 5]);
        assert_eq!(removed.iter().map(|i| i.key).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn merge_rejects_any_collision() {
        let mut reg = keyed(&[1, 5]);
        assert!(matches!(
            reg.merge(vec![item(2, ""), item(5, "")]),
            Err(RegistryError::DuplicateKey { index: 1 })
        ));
        assert_eq!(keys(&reg), vec![1, 5]);
        reg.merge(vec![item(3, ""), item(0, "")]).unwrap();
        assert_eq!(keys(&reg), vec![0, 1, 3, 5]);
    }

    #[test]
    fn remove_range_accepts_swapped_bounds() {
        let mut reg = keyed(&[1, 2, 4, 6, 8, 9]);
        let removed = reg.remove_range_by_key(&7, &2, key_cmp);
        assert_eq!(removed.iter().map(|i| i.key).collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(keys(&reg), vec![1, 8, 9]);
        assert!(reg.remove_range_by_key(&20, &30, key_cmp).is_empty());
    }

    #[test]
    fn diff_partitions_keys() {
        let reg = keyed(&[1, 2, 4]);
        let others = [2u32, 3, 4, 5];
        let diff = reg.diff(&others, |t, u| t.key.cmp(u));
        assert_eq!(diff.added, vec![&3, &5]);
        assert_eq!(diff.removed.iter().map(|i| i.key).collect::<Vec<_>>(), vec![1]);
        let existing: Vec<(u32, u32)> = diff.existing.iter().map(|(t, u)| (t.key, **u)).collect();
        assert_eq!(existing, vec![(2, 2), (4, 4)]);
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn split_existing_separates_updated_pairs() {
        let reg = keyed(&[1, 2, 3]);
        let others = [item(1, "base"), item(2, "changed"), item(3, "base")];
        let diff = reg.diff(&others, by_key);
        let (unchanged, updated) = diff.split_existing(|old, new| old == new);
        assert_eq!(unchanged.len(), 2);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].1.label, "changed");
    }

    #[test]
    fn custom_comparator_orders_descending() {
        let mut reg = SortedRegistry::with_comparator(|a: &i32, b: &i32| b.cmp(a));
        for v in [1, 9, 4] {
            reg.try_insert(v);
        }
        assert_eq!(reg.as_slice(), &[9, 4, 1]);
        assert_eq!(reg.first(), Some(&9));
        assert_eq!(reg.last(), Some(&1));
    }
}
