use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// `batch_size` consecutive records go to one shell before moving on.
    RoundRobin { batch_size: usize },
    /// Uniformly random shell per record.
    Random,
}

impl RoutingPolicy {
    /// A batch size of zero selects random routing.
    pub fn from_batch_size(batch_size: usize) -> Self {
        if batch_size == 0 {
            RoutingPolicy::Random
        } else {
            RoutingPolicy::RoundRobin { batch_size }
        }
    }
}

/// Picks the shell for each incoming record.
#[derive(Debug)]
pub struct Router {
    policy: RoutingPolicy,
    shells: usize,
    sequence: AtomicUsize,
}

impl Router {
    pub fn new(policy: RoutingPolicy, shells: usize) -> Self {
        Self {
            policy,
            shells: shells.max(1),
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    pub fn next(&self) -> usize {
        match self.policy {
            RoutingPolicy::RoundRobin { batch_size } => {
                let n = self.sequence.fetch_add(1, Ordering::Relaxed);
                (n / batch_size) % self.shells
            }
            RoutingPolicy::Random => rand::rng().random_range(0..self.shells),
        }
    }
}
