//! Worker-side frontier bookkeeping: what to visit, what was visited, and
//! how many links this worker may ever admit.
//!
//! The frontier is owned by exactly one worker and is not `Sync`-shared;
//! if crawl tasks inside one worker are ever parallelized, wrap it in a
//! mutex or keep it behind a single owning task.

use std::collections::{HashSet, VecDeque};

use crate::schema::{FrontierProgress, Link};
use crate::util::canonical_link;

/// Admission cap: cumulative admissions vs. the maximum.
///
/// `current` is never decremented. It starts at 1 because the seed
/// counts, even when `max` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkBudget {
    current: usize,
    max: usize,
}

impl LinkBudget {
    fn seeded(max: usize) -> Self {
        Self { current: 1, max }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }

    fn admit(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.current += 1;
        true
    }
}

/// Why a candidate was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Already processed (or it is the seed)
    Visited,
    /// Already waiting in the frontier, or currently being processed
    Duplicate,
    /// The link budget is used up
    BudgetExhausted,
}

/// FIFO frontier + visited set + link budget for one worker.
#[derive(Debug)]
pub struct Frontier {
    seed: Link,
    queue: VecDeque<Link>,
    queued: HashSet<Link>,
    in_progress: HashSet<Link>,
    visited: HashSet<Link>,
    budget: LinkBudget,
}

impl Frontier {
    /// Start a frontier for a worker launched on `seed`.
    ///
    /// The seed is counted against the budget but not enqueued: it is the
    /// page the worker processes first.
    pub fn new(seed: &str, max_links: usize) -> Self {
        Self {
            seed: canonical_link(seed),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_progress: HashSet::new(),
            visited: HashSet::new(),
            budget: LinkBudget::seeded(max_links),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Try to admit one candidate.
    pub fn admit(&mut self, candidate: &str) -> Result<(), Rejection> {
        let link = canonical_link(candidate);

        if link == self.seed || self.visited.contains(&link) {
            return Err(Rejection::Visited);
        }
        if self.budget.is_exhausted() {
            return Err(Rejection::BudgetExhausted);
        }
        if self.queued.contains(&link) || self.in_progress.contains(&link) {
            return Err(Rejection::Duplicate);
        }

        self.budget.admit();
        self.queued.insert(link.clone());
        self.queue.push_back(link);
        Ok(())
    }

    /// Admit candidates in order, returning how many made it in.
    ///
    /// Rejections are silent. Once the budget runs out mid-batch, the rest
    /// of the batch is declined while earlier candidates stay admitted.
    pub fn add_links<I, S>(&mut self, candidates: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut admitted = 0;
        for candidate in candidates {
            match self.admit(candidate.as_ref()) {
                Ok(()) => admitted += 1,
                Err(reason) => {
                    log::trace!("link {} rejected: {:?}", candidate.as_ref(), reason);
                }
            }
        }
        admitted
    }

    /// Pop the head of the frontier and mark it in progress.
    pub fn take_next(&mut self) -> Option<Link> {
        let link = self.queue.pop_front()?;
        self.queued.remove(&link);
        self.in_progress.insert(link.clone());
        Some(link)
    }

    /// Record `link` as processed. Idempotent.
    pub fn mark_visited(&mut self, link: &str) {
        let link = canonical_link(link);
        self.in_progress.remove(&link);
        if self.queued.remove(&link) {
            self.queue.retain(|queued| *queued != link);
        }
        self.visited.insert(link);
    }

    /// Put an in-progress link back at the end of the frontier for another
    /// attempt. It was already admitted, so the budget is untouched.
    ///
    /// Returns `false` if the link is visited or already queued.
    pub fn requeue(&mut self, link: &str) -> bool {
        let link = canonical_link(link);
        if self.visited.contains(&link) || self.queued.contains(&link) {
            return false;
        }
        self.in_progress.remove(&link);
        self.queued.insert(link.clone());
        self.queue.push_back(link);
        true
    }

    /// Forget an in-progress link without marking it visited.
    ///
    /// A later `add_links` may admit it again if budget remains.
    pub fn release(&mut self, link: &str) {
        self.in_progress.remove(&canonical_link(link));
    }

    pub fn budget(&self) -> LinkBudget {
        self.budget
    }

    pub fn current_count(&self) -> usize {
        self.budget.current()
    }

    pub fn max_count(&self) -> usize {
        self.budget.max()
    }

    pub fn is_exhausted(&self) -> bool {
        self.budget.is_exhausted()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_visited(&self, link: &str) -> bool {
        self.visited.contains(&canonical_link(link))
    }

    pub fn is_queued(&self, link: &str) -> bool {
        self.queued.contains(&canonical_link(link))
    }

    /// Links still waiting, head first.
    pub fn pending(&self) -> impl Iterator<Item = &Link> {
        self.queue.iter()
    }

    pub fn visited(&self) -> impl Iterator<Item = &Link> {
        self.visited.iter()
    }

    pub fn progress(&self) -> FrontierProgress {
        FrontierProgress {
            admitted: self.budget.current(),
            max_links: self.budget.max(),
            queued: self.queue.len(),
            visited: self.visited.len(),
        }
    }
}
