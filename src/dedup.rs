use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Keeps exactly one representative per key, first occurrence wins.
/// Records whose key accessor returns `None` are dropped (they cannot carry
/// an identity into a dimension); the caller receives how many were dropped.
pub fn dedup_by_key<T, K, F>(records: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: Hash + Eq,
    F: Fn(&T) -> Option<K>,
{
    let mut seen: HashSet<K> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut missing_key = 0usize;

    for record in records {
        match key(&record) {
            None => missing_key += 1,
            Some(k) => {
                if seen.insert(k) {
                    kept.push(record);
                }
            }
        }
    }
    (kept, missing_key)
}

/// Keeps exactly one representative per key, most recent wins.
///
/// `recency` supplies the tie-break; on equal recency the later occurrence
/// in input order replaces the earlier one, so the last record seen for a
/// key is what survives. Records without a key are dropped and counted.
pub fn dedup_by_key_latest<T, K, F, R>(records: Vec<T>, key: F, recency: R) -> (Vec<T>, usize)
where
    K: Hash + Eq,
    F: Fn(&T) -> Option<K>,
    R: Fn(&T) -> i64,
{
    let mut best: HashMap<K, (i64, usize)> = HashMap::with_capacity(records.len());
    let mut slots: Vec<Option<T>> = Vec::with_capacity(records.len());
    let mut missing_key = 0usize;

    for record in records {
        let k = match key(&record) {
            None => {
                missing_key += 1;
                continue;
            }
            Some(k) => k,
        };
        let at = recency(&record);
        match best.get_mut(&k) {
            None => {
                best.insert(k, (at, slots.len()));
                slots.push(Some(record));
            }
            Some((seen_at, slot)) => {
                if at >= *seen_at {
                    *seen_at = at;
                    slots[*slot] = Some(record);
                }
            }
        }
    }
    (slots.into_iter().flatten().collect(), missing_key)
}
