//! Waiting pool: endpoints currently searching for a partner

use crate::endpoint::EndpointId;
use std::collections::VecDeque;

/// FIFO set of searching endpoints
///
/// Insertion order is preserved so the matcher can hand out the
/// longest-waiting candidate first. An id appears at most once.
#[derive(Debug, Default, Clone)]
pub struct WaitingPool {
    queue: VecDeque<EndpointId>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint at the back; returns false if it was already waiting
    pub fn insert(&mut self, id: EndpointId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    /// Remove an endpoint; returns false if it was not waiting
    pub fn remove(&mut self, id: &EndpointId) -> bool {
        match self.queue.iter().position(|waiting| waiting == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.queue.iter().any(|waiting| waiting == id)
    }

    /// Iterate in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &EndpointId> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
