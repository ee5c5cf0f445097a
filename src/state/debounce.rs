use std::collections::BTreeMap;

/// Field-keyed debounce scheduler driven by an external clock.
///
/// Scheduling a field replaces any pending value for that field and restarts
/// its quiet period (last write wins). The owner polls [`Debouncer::take_due`]
/// when its single timer fires and re-arms the timer for
/// [`Debouncer::next_deadline`].
#[derive(Clone, Debug)]
pub(crate) struct Debouncer<K: Ord + Clone, V> {
    pending: BTreeMap<K, Pending<V>>,
}

#[derive(Clone, Debug)]
struct Pending<V> {
    value: V,
    due_ms: i64,
}

impl<K: Ord + Clone, V> Default for Debouncer<K, V> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V> Debouncer<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: K, value: V, now_ms: i64, delay_ms: i64) {
        self.pending.insert(
            key,
            Pending {
                value,
                due_ms: now_ms + delay_ms.max(0),
            },
        );
    }

    /// Drops the pending emission for `key`, returning its value.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.pending.remove(key).map(|p| p.value)
    }

    /// Keeps only the pending emissions whose key satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.pending.retain(|k, _| keep(k));
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.pending.values().map(|p| p.due_ms).min()
    }

    /// Removes and returns every emission whose quiet period has elapsed,
    /// ordered by due time.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<(K, V)> {
        let due_keys = self
            .pending
            .iter()
            .filter(|(_, p)| p.due_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();

        let mut out = due_keys
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (p.due_ms, k, p.value)))
            .collect::<Vec<_>>();
        out.sort_by_key(|(due, _, _)| *due);
        out.into_iter().map(|(_, k, v)| (k, v)).collect()
    }
}
