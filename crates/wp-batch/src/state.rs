// state.rs — BatchState: ordered work items and how far through them we are.
//
//   NotStarted ──► InProgress ──► Completed
//        │             │
//        └─────────────┴────────► Aborted
//
// `current_index` only ever moves forward; closing item N sets it to N + 1.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Aborted,
}

impl BatchStatus {
    pub fn can_transition_to(&self, next: &BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::NotStarted, BatchStatus::InProgress)
                | (BatchStatus::NotStarted, BatchStatus::Aborted)
                | (BatchStatus::InProgress, BatchStatus::Completed)
                | (BatchStatus::InProgress, BatchStatus::Aborted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Aborted)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::NotStarted => write!(f, "not_started"),
            BatchStatus::InProgress => write!(f, "in_progress"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::InProgress => write!(f, "in_progress"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub index: usize,
    pub description: String,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchState {
    pub batch_id: String,
    pub items: Vec<WorkItem>,
    pub status: BatchStatus,
    current_index: usize,
    completed: BTreeSet<usize>,
    failed: BTreeSet<usize>,
    /// Pipeline run of the item at `current_index`, once it has started.
    current_run_id: Option<String>,
}

impl BatchState {
    pub fn new(batch_id: impl Into<String>, descriptions: Vec<String>) -> Self {
        let items = descriptions
            .into_iter()
            .enumerate()
            .map(|(index, description)| WorkItem {
                index,
                description,
                status: ItemStatus::Pending,
            })
            .collect();
        Self {
            batch_id: batch_id.into(),
            items,
            status: BatchStatus::NotStarted,
            current_index: 0,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            current_run_id: None,
        }
    }

    /// Rebuild a state from persisted progress. Items before
    /// `current_index` that are in neither set are treated as completed.
    pub(crate) fn restore(
        batch_id: impl Into<String>,
        descriptions: Vec<String>,
        current_index: usize,
        completed: impl IntoIterator<Item = usize>,
        failed: impl IntoIterator<Item = usize>,
        current_run_id: Option<String>,
        status: BatchStatus,
    ) -> Self {
        let mut state = Self::new(batch_id, descriptions);
        let total = state.items.len();
        state.current_index = current_index.min(total);
        state.failed = failed.into_iter().filter(|i| *i < total).collect();
        state.completed = completed
            .into_iter()
            .filter(|i| *i < total && !state.failed.contains(i))
            .collect();
        for index in 0..state.current_index {
            if !state.failed.contains(&index) {
                state.completed.insert(index);
            }
        }
        state.status = status;

        for item in &mut state.items {
            item.status = if state.completed.contains(&item.index) {
                ItemStatus::Completed
            } else if state.failed.contains(&item.index) {
                ItemStatus::Failed
            } else {
                ItemStatus::Pending
            };
        }
        if let Some(run_id) = current_run_id {
            if let Some(item) = state.items.get_mut(state.current_index) {
                item.status = ItemStatus::InProgress;
                state.current_run_id = Some(run_id);
            }
        }
        state
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn completed(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<usize> {
        &self.failed
    }

    pub fn current_run_id(&self) -> Option<&str> {
        self.current_run_id.as_deref()
    }

    /// The item the batch should work on next, if any remain.
    pub fn next_item(&self) -> Option<&WorkItem> {
        self.items.get(self.current_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.items.len()
    }

    pub fn transition(&mut self, next: BatchStatus) -> Result<(), BatchError> {
        if !self.status.can_transition_to(&next) {
            return Err(BatchError::InvalidTransition {
                batch_id: self.batch_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(batch_id = %self.batch_id, from = %self.status, to = %next, "batch status changed");
        self.status = next;
        Ok(())
    }

    /// Mark the current item as running under `run_id`.
    pub fn start_current(&mut self, run_id: impl Into<String>) -> Result<&WorkItem, BatchError> {
        let total = self.items.len();
        let index = self.current_index;
        let item = self
            .items
            .get_mut(index)
            .ok_or(BatchError::IndexOutOfRange { index, total })?;
        item.status = ItemStatus::InProgress;
        self.current_run_id = Some(run_id.into());
        Ok(item)
    }

    /// Close the current item and move past it.
    pub fn close_current(&mut self, outcome: ItemStatus) -> Result<(), BatchError> {
        let total = self.items.len();
        let index = self.current_index;
        let item = self
            .items
            .get_mut(index)
            .ok_or(BatchError::IndexOutOfRange { index, total })?;
        item.status = outcome;
        match outcome {
            ItemStatus::Completed => {
                self.completed.insert(index);
            }
            ItemStatus::Failed => {
                self.failed.insert(index);
            }
            ItemStatus::Pending | ItemStatus::InProgress => {}
        }
        self.current_run_id = None;
        self.advance_to(index + 1)
    }

    pub fn advance_to(&mut self, index: usize) -> Result<(), BatchError> {
        if index < self.current_index {
            return Err(BatchError::IndexRegression {
                from: self.current_index,
                to: index,
            });
        }
        self.current_index = index.min(self.items.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n: usize) -> BatchState {
        BatchState::new("b1", (0..n).map(|i| format!("feature {}", i)).collect())
    }

    #[test]
    fn status_transitions() {
        use BatchStatus::*;
        assert!(NotStarted.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&Completed));
        assert!(InProgress.can_transition_to(&Aborted));
        assert!(!Completed.can_transition_to(&InProgress));
        assert!(!Aborted.can_transition_to(&InProgress));
        assert!(!NotStarted.can_transition_to(&Completed));
    }

    #[test]
    fn closing_items_moves_forward() {
        let mut s = state(3);
        s.transition(BatchStatus::InProgress).unwrap();
        s.start_current("run-a").unwrap();
        assert_eq!(s.items[0].status, ItemStatus::InProgress);
        assert_eq!(s.current_run_id(), Some("run-a"));

        s.close_current(ItemStatus::Completed).unwrap();
        assert_eq!(s.current_index(), 1);
        assert_eq!(s.current_run_id(), None);

        s.start_current("run-b").unwrap();
        s.close_current(ItemStatus::Failed).unwrap();
        assert_eq!(s.current_index(), 2);
        assert!(s.completed().contains(&0));
        assert!(s.failed().contains(&1));
    }

    #[test]
    fn index_never_moves_backwards() {
        let mut s = state(4);
        s.advance_to(2).unwrap();
        assert!(matches!(
            s.advance_to(1),
            Err(BatchError::IndexRegression { from: 2, to: 1 })
        ));
        assert_eq!(s.current_index(), 2);
    }

    #[test]
    fn closing_past_the_end_is_rejected() {
        let mut s = state(1);
        s.start_current("r").unwrap();
        s.close_current(ItemStatus::Completed).unwrap();
        assert!(s.is_exhausted());
        assert!(matches!(
            s.close_current(ItemStatus::Completed),
            Err(BatchError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn restore_fills_in_items_before_the_index() {
        let s = BatchState::restore(
            "b1",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            3,
            vec![],
            vec![1],
            Some("run-d".into()),
            BatchStatus::InProgress,
        );
        assert_eq!(s.completed().iter().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(s.items[1].status, ItemStatus::Failed);
        assert_eq!(s.items[3].status, ItemStatus::InProgress);
        assert_eq!(s.current_run_id(), Some("run-d"));
    }
}
