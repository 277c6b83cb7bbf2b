//! Unordered list with O(1) removal
//!
//! Removal swaps the last element into the hole, so iteration order is not
//! preserved across removals. Callers must not rely on ordering.

/// A vector-backed bag with swap-remove deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnorderedList<T> {
    items: Vec<T>,
}

impl<T> Default for UnorderedList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> UnorderedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Find an element matching the predicate
    pub fn find<F>(&self, pred: F) -> Option<&T>
    where
        F: FnMut(&&T) -> bool,
    {
        self.items.iter().find(pred)
    }

    /// Remove the first element matching the predicate, filling the gap with the last element
    pub fn remove_where<F>(&mut self, pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.items.iter().position(pred)?;
        Some(self.items.swap_remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<'a, T> IntoIterator for &'a UnorderedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> FromIterator<T> for UnorderedList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_swaps_last_into_hole() {
        let mut list: UnorderedList<u32> = [1, 2, 3, 4].into_iter().collect();
        assert_eq!(list.remove_where(|&v| v == 2), Some(2));
        assert_eq!(list.as_slice(), &[1, 4, 3]);
    }

    #[test]
    fn test_remove_missing() {
        let mut list: UnorderedList<u32> = [1, 2].into_iter().collect();
        assert_eq!(list.remove_where(|&v| v == 9), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_last_and_only() {
        let mut list = UnorderedList::new();
        list.push("a");
        assert_eq!(list.remove_where(|v| *v == "a"), Some("a"));
        assert!(list.is_empty());
    }
}
