//! Bucketed hash map with per-bucket locking.
//!
//! Transaction and dialog tables in a signaling node are hot from many threads at once; one lock
//! per bucket keeps them out of each other's way.  Buckets are [List] chains, keys are either a
//! plain u32 or a byte string (case-sensitive or not), and both kinds may share a bucket.
//! Duplicate keys are allowed; lookups return the first hit in chain order.
//!
//! Access to stored values goes through closures: the bucket mutex is held for the duration of
//! the closure and no reference escapes it.  `lookup_global` scans buckets one at a time in
//! index order; it is a traversal, not a snapshot.

use std::sync::Mutex;

use crate::list::List;

/// Bernstein 33 mixer, the classic djb2 loop.
pub fn hash_bytes(data: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in data {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

/// Case-insensitive variant: bytes are lowercased before mixing.
pub fn hash_bytes_nocase(data: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in data {
        h = h.wrapping_mul(33).wrapping_add(b.to_ascii_lowercase() as u32);
    }
    h
}

/// Variant mixing one extra salt byte after the data, for callers that partition one key space
/// into several (for instance transaction tables split by method).
pub fn hash_bytes_salted(data: &[u8], salt: u8) -> u32 {
    hash_bytes(data)
        .wrapping_mul(33)
        .wrapping_add(salt as u32)
}

/// An owned key as stored with each entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HashKey {
    U32(u32),
    Bytes {
        data: Vec<u8>,
        case_sensitive: bool,
    },
}

/// A borrowed key for probing.
#[derive(Copy, Clone, Debug)]
pub enum KeyRef<'a> {
    U32(u32),
    Bytes {
        data: &'a [u8],
        case_sensitive: bool,
    },
}

impl HashKey {
    pub fn str_key(s: &str, case_sensitive: bool) -> HashKey {
        HashKey::Bytes {
            data: s.as_bytes().to_vec(),
            case_sensitive,
        }
    }

    fn hash(&self) -> u32 {
        match self {
            HashKey::U32(v) => hash_bytes(&v.to_le_bytes()),
            HashKey::Bytes {
                data,
                case_sensitive: true,
            } => hash_bytes(data),
            HashKey::Bytes {
                data,
                case_sensitive: false,
            } => hash_bytes_nocase(data),
        }
    }

    /// Comparison under the stored key's own case rule.
    fn matches(&self, probe: &KeyRef<'_>) -> bool {
        match (self, probe) {
            (HashKey::U32(a), KeyRef::U32(b)) => a == b,
            (
                HashKey::Bytes {
                    data,
                    case_sensitive,
                },
                KeyRef::Bytes { data: p, .. },
            ) => {
                if *case_sensitive {
                    data.as_slice() == *p
                } else {
                    data.eq_ignore_ascii_case(p)
                }
            }
            _ => false,
        }
    }
}

impl KeyRef<'_> {
    fn hash(&self) -> u32 {
        match self {
            KeyRef::U32(v) => hash_bytes(&v.to_le_bytes()),
            KeyRef::Bytes {
                data,
                case_sensitive: true,
            } => hash_bytes(data),
            KeyRef::Bytes {
                data,
                case_sensitive: false,
            } => hash_bytes_nocase(data),
        }
    }
}

/// One entry: the key kind travels with the data so mixed-key buckets stay comparable.
#[derive(Debug)]
pub struct Entry<T> {
    pub key: HashKey,
    pub data: T,
}

struct Bucket<T> {
    chain: Mutex<List<Entry<T>>>,
}

pub struct HashTable<T> {
    buckets: Box<[Bucket<T>]>,
    mask: u32,
}

impl<T> HashTable<T> {
    /// Build a table with `bsize` buckets, rounded up to the next power of two.
    pub fn new(bsize: u32) -> HashTable<T> {
        let count = bsize.max(1).next_power_of_two();
        let buckets = (0..count)
            .map(|_| Bucket {
                chain: Mutex::new(List::new()),
            })
            .collect::<Vec<_>>();
        HashTable {
            buckets: buckets.into_boxed_slice(),
            mask: count - 1,
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.mask + 1
    }

    fn bucket_for(&self, hash: u32) -> &Bucket<T> {
        &self.buckets[(hash & self.mask) as usize]
    }

    /// Append an entry to its bucket chain.  Existing entries with an equal key stay; lookups
    /// keep returning the earlier one until it is deleted.
    pub fn add(&self, key: HashKey, data: T) {
        let bucket = self.bucket_for(key.hash());
        bucket.chain.lock().unwrap().push_back(Entry { key, data });
    }

    /// Build the entry from raw key bytes and a payload in one call.
    pub fn add_by_key(&self, key_bytes: &[u8], case_sensitive: bool, data: T) {
        self.add(
            HashKey::Bytes {
                data: key_bytes.to_vec(),
                case_sensitive,
            },
            data,
        );
    }

    /// Same, for integer keys.
    pub fn add_by_u32(&self, key: u32, data: T) {
        self.add(HashKey::U32(key), data);
    }

    /// Run `f` over the first entry matching `key`, under the bucket lock.
    pub fn lookup<R>(&self, key: &KeyRef<'_>, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let bucket = self.bucket_for(key.hash());
        let mut chain = bucket.chain.lock().unwrap();
        f(chain.find_mut(|e| e.key.matches(key)).map(|e| &mut e.data))
    }

    /// Clone out the first match; convenience over [HashTable::lookup].
    pub fn lookup_clone(&self, key: &KeyRef<'_>) -> Option<T>
    where
        T: Clone,
    {
        self.lookup(key, |v| v.cloned())
    }

    /// Unlink the first entry matching `key` and hand back its payload.
    ///
    /// Dropping the returned value is the C side's delete-all mode; keeping it is the
    /// keep-user-data mode.  The key storage goes away with the entry either way.
    pub fn delete(&self, key: &KeyRef<'_>) -> Option<T> {
        let bucket = self.bucket_for(key.hash());
        let mut chain = bucket.chain.lock().unwrap();
        chain
            .remove_first_where(|e| e.key.matches(key))
            .map(|e| e.data)
    }

    /// Scan every bucket in index order and run `f` over the first entry the predicate accepts.
    ///
    /// Buckets are locked one at a time; entries added behind the scan are not seen.
    pub fn lookup_global<R>(
        &self,
        mut pred: impl FnMut(&Entry<T>) -> bool,
        f: impl FnOnce(Option<&mut Entry<T>>) -> R,
    ) -> R {
        for bucket in self.buckets.iter() {
            let mut chain = bucket.chain.lock().unwrap();
            if let Some(e) = chain.find_mut(|e| pred(e)) {
                return f(Some(e));
            }
        }
        f(None)
    }

    /// Unlink the first entry the predicate accepts anywhere in the table.
    pub fn remove_first_global(&self, mut pred: impl FnMut(&Entry<T>) -> bool) -> Option<T> {
        for bucket in self.buckets.iter() {
            let mut chain = bucket.chain.lock().unwrap();
            if let Some(e) = chain.remove_first_where(|e| pred(e)) {
                return Some(e.data);
            }
        }
        None
    }

    /// Total entries, summed bucket by bucket.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.chain.lock().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
