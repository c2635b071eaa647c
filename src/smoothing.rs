//! Score and label smoothing over the most recent frames.
//! Both histories sit on a fixed-capacity circular window; the oldest entry
//! is overwritten once the window is full.

use crate::model::UNKNOWN_LABEL;

/// Capacity shared by the score and label histories.
pub const HISTORY_CAPACITY: usize = 10;
/// Entries trimmed from each end before averaging a full score window.
const TRIM_EACH_SIDE: usize = 2;

/// Fixed-capacity circular window. Pre-allocated, never grows.
#[derive(Debug, Clone)]
pub struct RingWindow<T> {
    slots: Vec<Option<T>>,
    pos: usize,
    count: usize,
}

impl<T: Clone> RingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            pos: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.slots.len();
        self.slots[self.pos] = Some(value);
        self.pos = (self.pos + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.pos = 0;
        self.count = 0;
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.slots.len();
        let start = (self.pos + capacity - self.count) % capacity;
        (0..self.count).filter_map(move |i| self.slots[(start + i) % capacity].as_ref())
    }
}

/// Rolling raw health scores with trimmed-mean display filtering.
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    window: RingWindow<f64>,
}

impl Default for ScoreHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreHistory {
    pub fn new() -> Self {
        Self {
            window: RingWindow::new(HISTORY_CAPACITY),
        }
    }

    /// Record a raw score. Non-finite scores are ignored.
    pub fn push(&mut self, score: f64) {
        if score.is_finite() {
            self.window.push(score);
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Displayed score, or `None` before the first sample.
    pub fn filtered(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(filter_health_score_for_display(
            &self.window.iter().copied().collect::<Vec<_>>(),
        ))
    }
}

/// Trimmed mean of the most recent 10 scores (drop 2 lowest and 2 highest).
/// With fewer than 10 scores, a plain mean; with none, 0.
pub fn filter_health_score_for_display(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let recent = &scores[scores.len().saturating_sub(HISTORY_CAPACITY)..];
    if recent.len() < HISTORY_CAPACITY {
        return recent.iter().sum::<f64>() / recent.len() as f64;
    }
    let mut sorted = recent.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let kept = &sorted[TRIM_EACH_SIDE..sorted.len() - TRIM_EACH_SIDE];
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Rolling detected labels with majority-vote smoothing.
#[derive(Debug, Clone)]
pub struct LabelHistory {
    window: RingWindow<String>,
}

impl Default for LabelHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelHistory {
    pub fn new() -> Self {
        Self {
            window: RingWindow::new(HISTORY_CAPACITY),
        }
    }

    pub fn push(&mut self, label: impl Into<String>) {
        self.window.push(label.into());
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Most frequent label; ties go to the label seen most recently.
    /// `UNKNOWN` when empty.
    pub fn majority(&self) -> String {
        let labels: Vec<&String> = self.window.iter().collect();
        let mut best: Option<(&String, usize, usize)> = None; // (label, count, last index)
        for (idx, label) in labels.iter().enumerate() {
            let count = labels.iter().filter(|l| *l == label).count();
            let last = labels.iter().rposition(|l| l == label).unwrap_or(idx);
            let better = match best {
                None => true,
                Some((_, c, l)) => count > c || (count == c && last > l),
            };
            if better {
                best = Some((label, count, last));
            }
        }
        best.map(|(l, _, _)| l.clone())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_mean_of_full_window() {
        let scores = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];
        assert_eq!(filter_health_score_for_display(&scores), 55.0);
    }

    #[test]
    fn trimmed_mean_ignores_order() {
        let scores = [100.0, 10.0, 60.0, 30.0, 90.0, 50.0, 20.0, 80.0, 40.0, 70.0];
        assert_eq!(filter_health_score_for_display(&scores), 55.0);
    }

    #[test]
    fn single_spike_is_trimmed() {
        let mut scores = [80.0; 10];
        scores[4] = 0.0;
        assert_eq!(filter_health_score_for_display(&scores), 80.0);
    }

    #[test]
    fn short_history_falls_back_to_mean() {
        assert_eq!(filter_health_score_for_display(&[40.0, 60.0]), 50.0);
        assert_eq!(filter_health_score_for_display(&[]), 0.0);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut h = ScoreHistory::new();
        for s in 0..15 {
            h.push(s as f64);
        }
        assert_eq!(h.len(), 10);
        // window holds 5..=14; trimmed → 7..=12
        assert_eq!(h.filtered(), Some(9.5));
    }

    #[test]
    fn history_skips_non_finite() {
        let mut h = ScoreHistory::new();
        h.push(f64::NAN);
        assert!(h.filtered().is_none());
        h.push(42.0);
        assert_eq!(h.filtered(), Some(42.0));
    }

    #[test]
    fn ring_iterates_oldest_first_after_wrap() {
        let mut r = RingWindow::new(3);
        for v in 1..=5 {
            r.push(v);
        }
        assert_eq!(r.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        r.clear();
        assert!(r.is_empty());
    }

    #[test]
    fn majority_vote_and_empty() {
        let mut h = LabelHistory::new();
        assert_eq!(h.majority(), "UNKNOWN");
        for l in ["Idle", "Overload", "Idle", "Idle", "Overload"] {
            h.push(l);
        }
        assert_eq!(h.majority(), "Idle");
    }

    #[test]
    fn majority_tie_prefers_most_recent() {
        let mut h = LabelHistory::new();
        for l in ["Idle", "Overload", "Overload", "Idle"] {
            h.push(l);
        }
        assert_eq!(h.majority(), "Idle");
    }

    #[test]
    fn label_window_is_bounded() {
        let mut h = LabelHistory::new();
        for _ in 0..8 {
            h.push("Idle");
        }
        for _ in 0..10 {
            h.push("Overload");
        }
        assert_eq!(h.len(), 10);
        assert_eq!(h.majority(), "Overload");
    }
}
