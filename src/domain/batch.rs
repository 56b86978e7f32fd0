use super::event::EventRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Records handed back by a transport because they could not be sent yet.
pub type UnsentBatch = EventBatch;

/// Ordered collection of records; the unit of transmission and of offline
/// persistence.
///
/// Records move between batches by value (`append`, `take`), so a record is
/// never held by two batches at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    id: String,
    records: Vec<EventRecord>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn from_records(records: Vec<EventRecord>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            records,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    /// Moves every record of `other` to the end of this batch.
    pub fn append(&mut self, other: &mut EventBatch) {
        self.records.append(&mut other.records);
    }

    /// Moves every record of `other` to the front of this batch, keeping the
    /// relative order of both.
    pub fn prepend(&mut self, mut other: EventBatch) {
        other.records.append(&mut self.records);
        self.records = other.records;
    }

    /// Takes all records out, leaving this batch empty.
    pub fn take(&mut self) -> EventBatch {
        EventBatch::from_records(std::mem::take(&mut self.records))
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}

impl FromIterator<EventRecord> for EventBatch {
    fn from_iter<T: IntoIterator<Item = EventRecord>>(iter: T) -> Self {
        Self::from_records(iter.into_iter().collect())
    }
}

impl IntoIterator for EventBatch {
    type Item = EventRecord;
    type IntoIter = std::vec::IntoIter<EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64) -> EventRecord {
        EventRecord::new(ts, ts)
    }

    #[test]
    fn test_take_leaves_batch_empty() {
        let mut batch: EventBatch = (0..3).map(record).collect();
        let taken = batch.take();
        assert!(batch.is_empty());
        assert_eq!(taken.len(), 3);
        assert_ne!(taken.id(), batch.id());
    }

    #[test]
    fn test_append_moves_records() {
        let mut a: EventBatch = (0..2).map(record).collect();
        let mut b: EventBatch = (2..4).map(record).collect();
        a.append(&mut b);
        assert!(b.is_empty());
        let stamps: Vec<i64> = a.iter().map(EventRecord::timestamp).collect();
        assert_eq!(stamps, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_prepend_keeps_fifo_order() {
        let mut queue: EventBatch = (5..7).map(record).collect();
        queue.prepend((1..3).map(record).collect());
        let stamps: Vec<i64> = queue.iter().map(EventRecord::timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 5, 6]);
    }
}
