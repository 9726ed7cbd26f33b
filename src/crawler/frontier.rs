// src/crawler/frontier.rs
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

use crate::models::{CrawlError, CrawlTask};

/// Per-organization queue of URLs to visit.
///
/// Tasks are held in depth tiers dequeued in ascending order, so the
/// expansion stays breadth-first: every depth-0 task is dispatched
/// before any depth-1 task. Visited and queued URLs are tracked by
/// normalized URL string, and the page budget bounds the total number
/// of tasks that will ever be dispatched.
pub struct Frontier {
    max_pages: u32,
    tiers: BTreeMap<u32, VecDeque<CrawlTask>>,
    visited: HashSet<String>,
    queued: HashSet<String>,
    dispatched: u32,
    budget_refusals: u32,
}

impl Frontier {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages,
            tiers: BTreeMap::new(),
            visited: HashSet::new(),
            queued: HashSet::new(),
            dispatched: 0,
            budget_refusals: 0,
        }
    }

    /// Accepts a task unless its URL was already seen or the page
    /// budget is spoken for. `priority` pushes the task to the front of
    /// its depth tier (contact-surface links jump the line).
    pub fn enqueue(&mut self, task: CrawlTask, priority: bool) {
        let key = task.url.as_str().to_string();

        if self.visited.contains(&key) || self.queued.contains(&key) {
            return;
        }
        if self.accepted() >= self.max_pages {
            self.budget_refusals += 1;
            debug!("Budget exhausted, dropping {}", key);
            return;
        }

        self.queued.insert(key);
        let tier = self.tiers.entry(task.depth).or_default();
        if priority {
            tier.push_front(task);
        } else {
            tier.push_back(task);
        }
    }

    /// Pops the next task from the lowest depth tier and marks it
    /// visited in the same step, so a URL can never be dispatched twice
    /// even with several workers draining the frontier.
    pub fn dequeue(&mut self) -> Result<CrawlTask, CrawlError> {
        let (&depth, _) = self
            .tiers
            .iter()
            .find(|(_, tier)| !tier.is_empty())
            .ok_or(CrawlError::FrontierEmpty)?;

        let tier = self.tiers.get_mut(&depth).unwrap();
        let task = tier.pop_front().ok_or(CrawlError::FrontierEmpty)?;

        self.mark_visited(task.url.as_str());
        self.dispatched += 1;
        Ok(task)
    }

    fn mark_visited(&mut self, url: &str) {
        self.queued.remove(url);
        self.visited.insert(url.to_string());
    }

    /// Drops everything still queued. Used when a crawl ends early.
    pub fn discard_remaining(&mut self) -> usize {
        let dropped: usize = self.tiers.values().map(|t| t.len()).sum();
        self.tiers.clear();
        self.queued.clear();
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.values().all(|t| t.is_empty())
    }

    pub fn budget_exhausted(&self) -> bool {
        self.dispatched >= self.max_pages
    }

    /// True when the budget actually cut the crawl short: enqueues were
    /// refused or undispatched work remains.
    pub fn had_budget_pressure(&self) -> bool {
        self.budget_refusals > 0 || !self.is_empty()
    }

    pub fn dispatched(&self) -> u32 {
        self.dispatched
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    fn accepted(&self) -> u32 {
        self.visited.len() as u32 + self.queued.len() as u32
    }
}
