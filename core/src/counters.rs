use std::collections::BTreeMap;

/// Named, monotonically increasing event counters.
///
/// Created empty at startup, only ever incremented, and read back as a
/// snapshot for status reports. Nothing is persisted across restarts.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    counts: BTreeMap<String, u64>,
}

impl Counters {
    /// Empty registry.
    pub fn new() -> Self { Self::default() }

    /// Bump `name` by one, creating it at 1 on first use.
    pub fn inc(&mut self, name: &str) {
        match self.counts.get_mut(name) {
            Some(n) => *n = n.saturating_add(1),
            None => {
                self.counts.insert(name.to_string(), 1);
            }
        }
    }

    /// Current value of `name` (0 if never incremented).
    pub fn get(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Point-in-time copy, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.clone()
    }
}
