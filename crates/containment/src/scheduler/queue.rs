//! Team queues and weighted fair queuing across teams

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::scheduler::types::{Priority, QueueEntry, SchedulerConfig, PRIORITY_ORDER};

/// Per-team priority queue with three internal FIFOs (P0, P1, P2).
#[derive(Debug, Default)]
pub struct TeamQueue {
    queues: HashMap<Priority, VecDeque<QueueEntry>>,
}

impl TeamQueue {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for priority in PRIORITY_ORDER {
            queues.insert(priority, VecDeque::new());
        }
        Self { queues }
    }

    pub fn size(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self, capacity: usize) -> bool {
        self.size() >= capacity
    }

    /// Append to the entry's priority FIFO. Returns false at capacity.
    pub fn enqueue(&mut self, entry: QueueEntry, capacity: usize) -> bool {
        if self.is_full(capacity) {
            return false;
        }
        self.queues
            .get_mut(&entry.priority)
            .expect("all priorities initialised")
            .push_back(entry);
        true
    }

    /// Pop from the highest-priority non-empty FIFO (P0 first).
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        for priority in PRIORITY_ORDER {
            if let Some(entry) = self.queues.get_mut(&priority).and_then(VecDeque::pop_front) {
                return Some(entry);
            }
        }
        None
    }

    /// The oldest `queued_at` across all priorities, for tie-breaking.
    pub fn peek_oldest(&self) -> Option<Instant> {
        self.queues
            .values()
            .filter_map(|q| q.front())
            .map(|e| e.queued_at)
            .min()
    }

    /// Move entries waiting longer than the threshold one priority level
    /// up. Returns the promoted entries.
    pub fn promote_starved(&mut self, threshold: Duration, now: Instant) -> Vec<QueueEntry> {
        let mut promoted = Vec::new();
        // P1 before P2 so a promoted entry cannot be promoted twice in one
        // pass.
        for priority in [Priority::P1, Priority::P2] {
            let Some(higher) = priority.above() else { continue };
            let drained = std::mem::take(self.queues.get_mut(&priority).expect("initialised"));
            let mut remaining = VecDeque::with_capacity(drained.len());
            for mut entry in drained {
                if now.duration_since(entry.queued_at) >= threshold {
                    entry.priority = higher;
                    promoted.push(entry.clone());
                    self.queues.get_mut(&higher).expect("initialised").push_back(entry);
                } else {
                    remaining.push_back(entry);
                }
            }
            *self.queues.get_mut(&priority).expect("initialised") = remaining;
        }
        promoted
    }
}

/// Org-level weighted round robin across team queues.
///
/// Each enqueue adds the team's weight to its deficit; dispatch picks the
/// team with the highest deficit (ties broken by oldest waiting entry),
/// pops one entry from its top non-empty bucket, and decrements the
/// deficit by 1.
#[derive(Debug)]
pub struct WeightedFairQueue {
    config: SchedulerConfig,
    team_queues: HashMap<String, TeamQueue>,
    deficits: HashMap<String, f64>,
}

impl WeightedFairQueue {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            team_queues: HashMap::new(),
            deficits: HashMap::new(),
        }
    }

    /// Route an entry to its team queue. Returns false if the team queue
    /// is full.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        let team = entry.team.clone();
        let capacity = self.config.team_queue_capacity;
        let queue = self.team_queues.entry(team.clone()).or_insert_with(TeamQueue::new);
        if !queue.enqueue(entry, capacity) {
            return false;
        }
        let weight = self.config.team_weight(&team) as f64;
        *self.deficits.entry(team).or_insert(0.0) += weight;
        true
    }

    pub fn total_size(&self) -> usize {
        self.team_queues.values().map(TeamQueue::size).sum()
    }

    pub fn team_size(&self, team: &str) -> usize {
        self.team_queues.get(team).map_or(0, TeamQueue::size)
    }

    pub fn is_full(&self) -> bool {
        self.total_size() >= self.config.org_queue_capacity
    }

    /// Weighted-round-robin dispatch.
    pub fn dispatch(&mut self) -> Option<QueueEntry> {
        let chosen = self
            .team_queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(team, queue)| {
                let deficit = self.deficits.get(team).copied().unwrap_or(0.0);
                let oldest = queue.peek_oldest();
                (team.clone(), deficit, oldest)
            })
            .max_by(|a, b| {
                // Highest deficit wins; ties go to the oldest entry.
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.2.cmp(&a.2))
            })?
            .0;

        let entry = self.team_queues.get_mut(&chosen)?.dequeue()?;
        let deficit = self.deficits.entry(chosen).or_insert(0.0);
        *deficit = (*deficit - 1.0).max(0.0);
        Some(entry)
    }

    /// Promote starved entries across all team queues.
    pub fn promote_all_starved(&mut self, threshold: Duration) -> Vec<QueueEntry> {
        let now = Instant::now();
        let mut all = Vec::new();
        for queue in self.team_queues.values_mut() {
            all.extend(queue.promote_starved(threshold, now));
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step_id: &str, team: &str, priority: Priority) -> QueueEntry {
        QueueEntry::new(step_id, "run-1", "acme", team, priority)
    }

    #[test]
    fn test_team_queue_pops_p0_first() {
        let mut queue = TeamQueue::new();
        queue.enqueue(entry("low", "t", Priority::P2), 100);
        queue.enqueue(entry("high", "t", Priority::P0), 100);
        queue.enqueue(entry("mid", "t", Priority::P1), 100);

        assert_eq!(queue.dequeue().unwrap().step_id, "high");
        assert_eq!(queue.dequeue().unwrap().step_id, "mid");
        assert_eq!(queue.dequeue().unwrap().step_id, "low");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_team_queue_capacity() {
        let mut queue = TeamQueue::new();
        assert!(queue.enqueue(entry("a", "t", Priority::P1), 2));
        assert!(queue.enqueue(entry("b", "t", Priority::P1), 2));
        assert!(!queue.enqueue(entry("c", "t", Priority::P1), 2));
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn test_promote_starved_moves_one_level_up() {
        let mut queue = TeamQueue::new();
        let mut old_entry = entry("stale", "t", Priority::P2);
        old_entry.queued_at = Instant::now() - Duration::from_secs(60);
        queue.enqueue(old_entry, 100);
        queue.enqueue(entry("fresh", "t", Priority::P2), 100);

        let promoted = queue.promote_starved(Duration::from_secs(30), Instant::now());
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].step_id, "stale");
        assert_eq!(promoted[0].priority, Priority::P1);

        // The stale entry now dispatches ahead of the fresh P2 one.
        assert_eq!(queue.dequeue().unwrap().step_id, "stale");
    }

    #[test]
    fn test_promotion_does_not_skip_levels_in_one_pass() {
        let mut queue = TeamQueue::new();
        let mut old_entry = entry("stale", "t", Priority::P2);
        old_entry.queued_at = Instant::now() - Duration::from_secs(60);
        queue.enqueue(old_entry, 100);

        let promoted = queue.promote_starved(Duration::from_secs(30), Instant::now());
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].priority, Priority::P1);
    }

    #[test]
    fn test_wfq_prefers_higher_weight_team() {
        let mut config = SchedulerConfig::default();
        config.team_weights.insert("heavy".into(), 3);
        let mut wfq = WeightedFairQueue::new(config);

        wfq.enqueue(entry("h1", "heavy", Priority::P1));
        wfq.enqueue(entry("l1", "light", Priority::P1));

        // heavy deficit 3 vs light deficit 1.
        assert_eq!(wfq.dispatch().unwrap().team, "heavy");
    }

    #[test]
    fn test_wfq_deficit_decrements_by_one() {
        let mut config = SchedulerConfig::default();
        config.team_weights.insert("heavy".into(), 2);
        let mut wfq = WeightedFairQueue::new(config);

        wfq.enqueue(entry("h1", "heavy", Priority::P1));
        wfq.enqueue(entry("h2", "heavy", Priority::P1));
        wfq.enqueue(entry("l1", "light", Priority::P1));

        // heavy: deficit 4; light: deficit 1.
        assert_eq!(wfq.dispatch().unwrap().team, "heavy"); // heavy now 3
        assert_eq!(wfq.dispatch().unwrap().team, "heavy"); // heavy now 2
        assert_eq!(wfq.dispatch().unwrap().team, "light");
        assert!(wfq.dispatch().is_none());
    }

    #[test]
    fn test_wfq_tie_breaks_on_oldest_entry() {
        let mut wfq = WeightedFairQueue::new(SchedulerConfig::default());
        let mut older = entry("older", "team-b", Priority::P1);
        older.queued_at = Instant::now() - Duration::from_secs(10);

        wfq.enqueue(entry("newer", "team-a", Priority::P1));
        wfq.enqueue(older);

        // Equal deficits (1.0 each): team-b holds the oldest entry.
        assert_eq!(wfq.dispatch().unwrap().step_id, "older");
    }

    #[test]
    fn test_wfq_team_and_total_sizes() {
        let mut wfq = WeightedFairQueue::new(SchedulerConfig::default());
        wfq.enqueue(entry("a", "x", Priority::P1));
        wfq.enqueue(entry("b", "x", Priority::P2));
        wfq.enqueue(entry("c", "y", Priority::P0));

        assert_eq!(wfq.total_size(), 3);
        assert_eq!(wfq.team_size("x"), 2);
        assert_eq!(wfq.team_size("missing"), 0);
    }
}
