//! Per-task batch dictionary.
//!
//! Matched records are keyed by their partition key so one flush carries at
//! most one record per key: a later record for a key replaces the earlier one
//! but keeps its position, so flush order follows first appearance in the
//! source.

use std::collections::HashMap;

use crate::source::Record;

#[derive(Debug)]
pub struct BatchBuffer {
    threshold: usize,
    entries: Vec<(String, Record)>,
    index: HashMap<String, usize>,
}

impl BatchBuffer {
    /// `threshold` is clamped to at least one record
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            entries: Vec::with_capacity(threshold),
            index: HashMap::with_capacity(threshold),
        }
    }

    /// Add or replace the record for `key`. Returns `true` once the buffer
    /// holds `threshold` distinct keys and should be flushed.
    pub fn insert(&mut self, key: String, record: Record) -> bool {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = record,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, record));
            }
        }
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every buffered record in flush order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<(String, Record)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: i64) -> Record {
        match json!({"v": value}) {
            serde_json::Value::Object(fields) => Record::new(fields),
            _ => unreachable!(),
        }
    }

    #[test]
    fn last_record_wins_but_keeps_first_position() {
        let mut buffer = BatchBuffer::new(10);
        buffer.insert("a".into(), record(1));
        buffer.insert("b".into(), record(2));
        buffer.insert("a".into(), record(3));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, "a");
        assert_eq!(drained[0].1.get("v"), Some(&json!(3)));
        assert_eq!(drained[1].0, "b");
        assert!(buffer.is_empty());
    }

    #[test]
    fn reports_full_at_threshold() {
        let mut buffer = BatchBuffer::new(2);
        assert!(!buffer.insert("a".into(), record(1)));
        assert!(!buffer.insert("a".into(), record(2)));
        assert!(buffer.insert("b".into(), record(3)));
        assert_eq!(buffer.len(), 2);

        buffer.drain();
        assert!(!buffer.is_full());
    }

    #[test]
    fn zero_threshold_flushes_every_record() {
        let mut buffer = BatchBuffer::new(0);
        assert!(buffer.insert("a".into(), record(1)));
    }
}
