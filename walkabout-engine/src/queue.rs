use std::collections::VecDeque;

use walkabout_core::EntityId;

/// Errors from queue manipulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// `insert_before`/`insert_after` could not find the anchor entry.
    TargetNotQueued(EntityId),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::TargetNotQueued(id) => write!(f, "Entity not queued: {id}"),
        }
    }
}

impl std::error::Error for QueueError {}

#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub id: EntityId,
    pub depth: u32,
}

/// The walker's FIFO visit queue. Entries are ids plus the traversal depth
/// they were enqueued at; entities are loaded when drained.
#[derive(Debug, Default)]
pub struct Queue {
    entries: VecDeque<QueueEntry>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Extend the tail.
    pub fn append(&mut self, ids: impl IntoIterator<Item = EntityId>, depth: u32) {
        for id in ids {
            self.entries.push_back(QueueEntry { id, depth });
        }
    }

    /// Extend the head, preserving the order of `ids`.
    pub fn prepend(&mut self, ids: impl IntoIterator<Item = EntityId>, depth: u32) {
        let mut front: Vec<QueueEntry> = ids
            .into_iter()
            .map(|id| QueueEntry { id, depth })
            .collect();
        while let Some(entry) = front.pop() {
            self.entries.push_front(entry);
        }
    }

    /// Insert `ids` immediately before the anchor entry.
    pub fn insert_before(
        &mut self,
        target: &EntityId,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), QueueError> {
        let index = self.position(target)?;
        let depth = self.entries[index].depth;
        for (offset, id) in ids.into_iter().enumerate() {
            self.entries.insert(index + offset, QueueEntry { id, depth });
        }
        Ok(())
    }

    /// Insert `ids` immediately after the anchor entry.
    pub fn insert_after(
        &mut self,
        target: &EntityId,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), QueueError> {
        let index = self.position(target)?;
        let depth = self.entries[index].depth;
        for (offset, id) in ids.into_iter().enumerate() {
            self.entries
                .insert(index + 1 + offset, QueueEntry { id, depth });
        }
        Ok(())
    }

    /// Remove entries matching the given ids. Returns the removed ids in
    /// queue order.
    pub fn dequeue(&mut self, ids: &[EntityId]) -> Vec<EntityId> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if ids.contains(&entry.id) {
                removed.push(entry.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// A snapshot copy of the queued ids, head first.
    pub fn snapshot(&self) -> Vec<EntityId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn is_queued(&self, id: &EntityId) -> bool {
        self.entries.iter().any(|e| &e.id == id)
    }

    fn position(&self, target: &EntityId) -> Result<usize, QueueError> {
        self.entries
            .iter()
            .position(|e| &e.id == target)
            .ok_or_else(|| QueueError::TargetNotQueued(target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn ids(raws: &[&str]) -> Vec<EntityId> {
        raws.iter().map(|r| id(r)).collect()
    }

    #[test]
    fn append_extends_tail_prepend_extends_head() {
        let mut q = Queue::new();
        q.append(ids(&["n:A:1", "n:A:2"]), 0);
        q.prepend(ids(&["n:A:3", "n:A:4"]), 0);
        assert_eq!(q.snapshot(), ids(&["n:A:3", "n:A:4", "n:A:1", "n:A:2"]));
    }

    #[test]
    fn insert_before_and_after_anchor() {
        let mut q = Queue::new();
        q.append(ids(&["n:A:1", "n:A:2", "n:A:3"]), 0);
        q.insert_before(&id("n:A:2"), ids(&["n:A:x", "n:A:y"])).unwrap();
        q.insert_after(&id("n:A:3"), ids(&["n:A:z"])).unwrap();
        assert_eq!(
            q.snapshot(),
            ids(&["n:A:1", "n:A:x", "n:A:y", "n:A:2", "n:A:3", "n:A:z"])
        );
    }

    #[test]
    fn insert_with_missing_anchor_is_an_error() {
        let mut q = Queue::new();
        q.append(ids(&["n:A:1"]), 0);
        let err = q.insert_before(&id("n:A:missing"), ids(&["n:A:x"])).unwrap_err();
        assert!(matches!(err, QueueError::TargetNotQueued(_)));
    }

    #[test]
    fn dequeue_removes_and_reports() {
        let mut q = Queue::new();
        q.append(ids(&["n:A:1", "n:A:2", "n:A:3"]), 0);
        let removed = q.dequeue(&ids(&["n:A:3", "n:A:1", "n:A:nope"]));
        assert_eq!(removed, ids(&["n:A:1", "n:A:3"]));
        assert!(!q.is_queued(&id("n:A:1")));
        assert!(q.is_queued(&id("n:A:2")));
    }

    #[test]
    fn inserted_entries_inherit_anchor_depth() {
        let mut q = Queue::new();
        q.append(ids(&["n:A:1"]), 5);
        q.insert_after(&id("n:A:1"), ids(&["n:A:2"])).unwrap();
        q.pop();
        assert_eq!(q.pop().unwrap().depth, 5);
    }
}
