use std::collections::BTreeMap;
use std::sync::Mutex;

/// Counter sink. Calls are fire-and-forget and must never block for long.
pub trait StatsReporter: Send + Sync {
    fn inc_counter(&self, name: &str, tags: &[(&str, &str)], delta: i64);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatsReporter;

impl StatsReporter for NullStatsReporter {
    fn inc_counter(&self, _name: &str, _tags: &[(&str, &str)], _delta: i64) {}
}

/// Keeps counters in memory, keyed by name and sorted tags.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    counters: Mutex<BTreeMap<String, i64>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one tagged counter.
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(&counter_key(name, tags)).copied().unwrap_or(0)
    }

    /// Sum of a counter across all tag sets.
    pub fn total(&self, name: &str) -> i64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.starts_with(&format!("{name}{{")))
            .map(|(_, value)| *value)
            .sum()
    }

    /// All counters, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

impl StatsReporter for InMemoryStats {
    fn inc_counter(&self, name: &str, tags: &[(&str, &str)], delta: i64) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(counter_key(name, tags)).or_insert(0) += delta;
    }
}

fn counter_key(name: &str, tags: &[(&str, &str)]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let mut tags = tags.to_vec();
    tags.sort_unstable();
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}
