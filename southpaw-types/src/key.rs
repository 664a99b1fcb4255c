use std::fmt;

use indexmap::IndexSet;

/// Canonical byte-vector key. Identity used by every index and by output
/// topics. Ordering is plain lexicographic byte order, which is what the
/// denormalize/emit engine relies on to produce deterministic child
/// sequences (spec §4.5).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A compact, order-preserving set of keys. `IndexSet` keeps insertion order
/// for cheap iteration while `contains`/`insert`/`remove` stay O(1)
/// amortized, which is what the reversible index (§4.1) needs on both its
/// forward and reverse halves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySet(IndexSet<Key>);

impl KeySet {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    pub fn insert(&mut self, key: Key) -> bool {
        self.0.insert(key)
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        self.0.shift_remove(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }

    pub fn union_from(&mut self, other: &KeySet) {
        for key in other.iter() {
            self.0.insert(key.clone());
        }
    }

    /// Serialize as a tightly packed sequence of length-prefixed byte keys
    /// (spec §9, "Pending set persistence"). Used both for the pending set
    /// and for the index's serialized members.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for key in self.0.iter() {
            let bytes = key.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut set = IndexSet::new();
        let mut pos = 0;
        while pos + 4 <= bytes.len() {
            let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > bytes.len() {
                break;
            }
            set.insert(Key::new(bytes[pos..pos + len].to_vec()));
            pos += len;
        }
        Self(set)
    }

    pub fn into_sorted_vec(self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.0.into_iter().collect();
        keys.sort();
        keys
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<T: IntoIterator<Item = Key>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for KeySet {
    type Item = Key;
    type IntoIter = indexmap::set::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut set = KeySet::new();
        set.insert(Key::from(b"m1".to_vec()));
        set.insert(Key::from(b"m2".to_vec()));
        let bytes = set.to_bytes();
        let restored = KeySet::from_bytes(&bytes);
        assert_eq!(set, restored);
    }

    #[test]
    fn canonical_byte_order_is_lexicographic() {
        let a = Key::from(b"a".to_vec());
        let b = Key::from(b"ab".to_vec());
        let c = Key::from(b"b".to_vec());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut set = KeySet::new();
        assert!(set.insert(Key::from(b"x".to_vec())));
        assert!(!set.insert(Key::from(b"x".to_vec())));
        assert_eq!(set.len(), 1);
    }
}
