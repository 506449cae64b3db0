use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spec::ValueId;

/// Identity of one tensor leaf: an SSA value plus the tuple path to the leaf.
///
/// Plain tensor values use an empty path. Keys compare by identity only, two
/// structurally identical tensors defined by different instructions never compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorKey {
    pub value: ValueId,
    pub path: Vec<usize>,
}

impl TensorKey {
    pub fn value(value: ValueId) -> Self {
        Self {
            value,
            path: Vec::new(),
        }
    }

    pub fn element(value: ValueId, index: usize) -> Self {
        Self {
            value,
            path: vec![index],
        }
    }

    pub fn with_path(value: ValueId, path: Vec<usize>) -> Self {
        Self { value, path }
    }
}

impl From<ValueId> for TensorKey {
    fn from(value: ValueId) -> Self {
        TensorKey::value(value)
    }
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.value.0)?;
        for index in &self.path {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

/// One equivalence class as reported to the bufferization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceClass {
    pub leader: TensorKey,
    pub members: Vec<TensorKey>,
    pub is_output: bool,
}

/// Serializable snapshot of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub key_count: usize,
    pub classes: Vec<EquivalenceClass>,
}

/// Union-find over tensor identities with an output-aliasing marker per class.
///
/// Keys are interned into dense indices on first sight and the disjoint-set
/// forest runs over those indices. Each root additionally owns a circular
/// member list (for class enumeration) and the output flag, which `union`
/// carries over to the surviving root.
///
/// Every query is total: a key that was never inserted behaves as an absent
/// singleton that is equivalent to nothing and not output-aliased.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceStore {
    keys: Vec<TensorKey>,
    indices: HashMap<TensorKey, usize>,
    parent: Vec<usize>,
    rank: Vec<u8>,
    next: Vec<usize>,
    output: Vec<bool>,
}

impl EquivalenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` as a singleton class if it is not present yet.
    pub fn insert(&mut self, key: &TensorKey) {
        self.intern(key);
    }

    /// Merges the classes of `a` and `b`, inserting either key if absent.
    ///
    /// Returns `true` when two distinct classes were merged.
    pub fn union(&mut self, a: &TensorKey, b: &TensorKey) -> bool {
        let a = self.intern(a);
        let b = self.intern(b);
        let root_a = self.find_compress(a);
        let root_b = self.find_compress(b);
        if root_a == root_b {
            return false;
        }

        // Union by rank; on equal rank the earlier-inserted root stays leader.
        let (leader, absorbed) = match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Greater => (root_a, root_b),
            std::cmp::Ordering::Less => (root_b, root_a),
            std::cmp::Ordering::Equal => {
                let (leader, absorbed) = if root_a < root_b {
                    (root_a, root_b)
                } else {
                    (root_b, root_a)
                };
                self.rank[leader] = self.rank[leader].saturating_add(1);
                (leader, absorbed)
            }
        };

        self.parent[absorbed] = leader;
        self.next.swap(leader, absorbed);
        self.output[leader] |= self.output[absorbed];
        true
    }

    pub fn contains(&self, key: &TensorKey) -> bool {
        self.indices.contains_key(key)
    }

    /// Returns `true` iff both keys are present and share a leader.
    pub fn is_equivalent(&self, a: &TensorKey, b: &TensorKey) -> bool {
        match (self.root_of(a), self.root_of(b)) {
            (Some(root_a), Some(root_b)) => root_a == root_b,
            _ => false,
        }
    }

    /// Returns the current leader of the class containing `key`.
    pub fn leader(&self, key: &TensorKey) -> Option<&TensorKey> {
        self.root_of(key).map(|root| &self.keys[root])
    }

    /// Every member of the class containing `key`, in insertion order.
    pub fn members_of(&self, key: &TensorKey) -> Vec<TensorKey> {
        let Some(&start) = self.indices.get(key) else {
            return Vec::new();
        };
        self.member_indices(start)
            .into_iter()
            .map(|index| self.keys[index].clone())
            .collect()
    }

    /// Flags the class currently containing `key` as output-aliased.
    pub fn mark_as_output(&mut self, key: &TensorKey) {
        let index = self.intern(key);
        let root = self.find_compress(index);
        self.output[root] = true;
    }

    pub fn is_output(&self, key: &TensorKey) -> bool {
        self.root_of(key).is_some_and(|root| self.output[root])
    }

    /// Number of registered tensor keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn class_count(&self) -> usize {
        (0..self.parent.len())
            .filter(|&index| self.parent[index] == index)
            .count()
    }

    /// All classes, ordered by the insertion order of their first member.
    pub fn classes(&self) -> Vec<EquivalenceClass> {
        let mut seen = vec![false; self.keys.len()];
        let mut classes = Vec::new();
        for index in 0..self.keys.len() {
            if seen[index] {
                continue;
            }
            let members = self.member_indices(index);
            for &member in &members {
                seen[member] = true;
            }
            let root = self.find(index);
            classes.push(EquivalenceClass {
                leader: self.keys[root].clone(),
                members: members
                    .into_iter()
                    .map(|member| self.keys[member].clone())
                    .collect(),
                is_output: self.output[root],
            });
        }
        classes
    }

    pub fn output_classes(&self) -> Vec<EquivalenceClass> {
        self.classes()
            .into_iter()
            .filter(|class| class.is_output)
            .collect()
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            key_count: self.len(),
            classes: self.classes(),
        }
    }

    fn intern(&mut self, key: &TensorKey) -> usize {
        if let Some(&index) = self.indices.get(key) {
            return index;
        }
        let index = self.keys.len();
        self.keys.push(key.clone());
        self.indices.insert(key.clone(), index);
        self.parent.push(index);
        self.rank.push(0);
        self.next.push(index);
        self.output.push(false);
        index
    }

    fn root_of(&self, key: &TensorKey) -> Option<usize> {
        self.indices.get(key).map(|&index| self.find(index))
    }

    fn find(&self, mut index: usize) -> usize {
        while self.parent[index] != index {
            index = self.parent[index];
        }
        index
    }

    fn find_compress(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    fn member_indices(&self, start: usize) -> Vec<usize> {
        let mut members = vec![start];
        let mut cursor = self.next[start];
        while cursor != start {
            members.push(cursor);
            cursor = self.next[cursor];
        }
        members.sort_unstable();
        members
    }
}

impl fmt::Display for EquivalenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in self.classes() {
            let members = class
                .members
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let marker = if class.is_output { " (output)" } else { "" };
            writeln!(f, "class {}{marker}: {{{members}}}", class.leader)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u32) -> TensorKey {
        TensorKey::value(ValueId(id))
    }

    #[test]
    fn absent_keys_are_equivalent_to_nothing() {
        let store = EquivalenceStore::new();
        assert!(!store.is_equivalent(&key(0), &key(0)));
        assert!(store.members_of(&key(0)).is_empty());
        assert!(!store.is_output(&key(0)));
        assert!(store.leader(&key(0)).is_none());
    }

    #[test]
    fn insert_is_idempotent() {
        let mut store = EquivalenceStore::new();
        store.insert(&key(3));
        store.insert(&key(3));
        assert_eq!(store.len(), 1);
        assert_eq!(store.members_of(&key(3)), vec![key(3)]);
        assert!(store.is_equivalent(&key(3), &key(3)));
    }

    #[test]
    fn union_is_transitive_and_reports_merges() {
        let mut store = EquivalenceStore::new();
        assert!(store.union(&key(0), &key(1)));
        assert!(store.union(&key(1), &key(2)));
        assert!(!store.union(&key(2), &key(0)));
        assert!(store.is_equivalent(&key(0), &key(2)));
        assert!(store.is_equivalent(&key(2), &key(0)));
        assert_eq!(store.members_of(&key(1)), vec![key(0), key(1), key(2)]);
        assert_eq!(store.class_count(), 1);
    }

    #[test]
    fn output_mark_survives_later_merges_in_both_directions() {
        let mut store = EquivalenceStore::new();
        store.union(&key(0), &key(1));
        store.mark_as_output(&key(1));
        // Build a higher-ranked class so the merged leader is not the marked root.
        store.union(&key(2), &key(3));
        store.union(&key(4), &key(5));
        store.union(&key(2), &key(4));
        store.union(&key(5), &key(0));
        assert_eq!(store.leader(&key(0)), Some(&key(2)));
        for id in 0..6 {
            assert!(store.is_output(&key(id)), "%{id}");
        }
        store.insert(&key(9));
        assert!(!store.is_output(&key(9)));
    }

    #[test]
    fn marking_a_class_twice_changes_nothing() {
        let mut store = EquivalenceStore::new();
        store.union(&key(0), &key(1));
        store.insert(&key(2));
        store.mark_as_output(&key(0));
        let before = store.summary();
        store.mark_as_output(&key(1));
        store.mark_as_output(&key(0));
        assert_eq!(store.summary(), before);
        assert_eq!(store.output_classes().len(), 1);
        for id in 0..3 {
            assert!(store.members_of(&key(id)).contains(&key(id)), "%{id}");
        }
    }

    #[test]
    fn leader_is_deterministic_earliest_root_on_ties() {
        let mut store = EquivalenceStore::new();
        store.insert(&key(7));
        store.insert(&key(2));
        store.union(&key(2), &key(7));
        assert_eq!(store.leader(&key(2)), Some(&key(7)));
    }

    #[test]
    fn classes_are_listed_in_first_member_order() {
        let mut store = EquivalenceStore::new();
        store.insert(&key(0));
        store.union(&key(1), &key(2));
        store.mark_as_output(&key(2));
        let classes = store.classes();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].members, vec![key(0)]);
        assert!(!classes[0].is_output);
        assert_eq!(classes[1].members, vec![key(1), key(2)]);
        assert!(classes[1].is_output);
        assert_eq!(store.output_classes().len(), 1);
    }

    #[test]
    fn display_lists_tuple_paths() {
        let mut store = EquivalenceStore::new();
        store.union(&TensorKey::element(ValueId(4), 1), &key(5));
        store.mark_as_output(&key(5));
        assert_eq!(store.to_string(), "class %4[1] (output): {%4[1], %5}\n");
    }
}
