use std::collections::HashMap;
use std::hash::Hash;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Collects an unbounded record set from a store whose single-query result
/// size is capped, by walking fixed-size pages until a short page signals
/// end-of-data.
///
/// Pages are requested strictly sequentially; the offsets are only meaningful
/// against a store that is not mutated mid-scan. A row inserted or removed
/// while the scan runs may appear in zero, one, or two pages depending on the
/// store's ordering stability. Callers that need a consistent snapshot must
/// arrange one themselves.
///
/// A page error aborts the whole scan. Rows gathered before the failure are
/// dropped with it: a failed scan means "counts unknown", never "counts
/// understated".
pub fn collect_all_pages<T, F>(page_size: usize, mut fetch: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(usize, usize) -> anyhow::Result<Vec<T>>,
{
    let page_size = page_size.max(1);
    let mut all: Vec<T> = Vec::new();
    let mut offset = 0usize;

    loop {
        let page = fetch(offset, page_size)?;
        let len = page.len();
        all.extend(page);
        if len < page_size {
            break;
        }
        offset += page_size;
    }

    Ok(all)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTally<K: Eq + Hash> {
    pub counts: HashMap<K, u64>,
    pub with_key: u64,
    pub without_key: u64,
}

/// Folds a record list into occurrence counts keyed by a foreign attribute.
/// Records whose key is absent never reach a bucket; they are only visible in
/// `without_key`. Single pass, order-independent.
pub fn tally_by_key<T, K, F>(records: &[T], mut key_fn: F) -> KeyTally<K>
where
    K: Eq + Hash,
    F: FnMut(&T) -> Option<K>,
{
    let mut tally = KeyTally {
        counts: HashMap::new(),
        with_key: 0,
        without_key: 0,
    };
    for record in records {
        match key_fn(record) {
            Some(key) => {
                *tally.counts.entry(key).or_insert(0) += 1;
                tally.with_key += 1;
            }
            None => {
                tally.without_key += 1;
            }
        }
    }
    tally
}
