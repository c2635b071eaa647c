//! Fleet comparison: robust outlier flagging across machines of one type.
//! The fleet median and median absolute deviation (MAD) set the bar; a
//! machine scoring more than two MADs below the median is flagged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats;

/// MADs below the median at which a machine is flagged.
pub const OUTLIER_MAD_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub machine_id: String,
    /// Latest health score; `None` if the machine has not been diagnosed.
    pub score: Option<f64>,
    #[serde(default)]
    pub is_gold_standard: bool,
}

impl FleetEntry {
    pub fn new(machine_id: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            machine_id: machine_id.into(),
            score,
            is_gold_standard: false,
        }
    }

    pub fn gold_standard(mut self) -> Self {
        self.is_gold_standard = true;
        self
    }

    fn present_score(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FleetStats {
    pub median: f64,
    pub mad: f64,
    /// `median - 2 * MAD`.
    pub threshold: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMachine {
    pub machine_id: String,
    pub score: Option<f64>,
    pub is_gold_standard: bool,
    pub is_outlier: bool,
    /// Score minus fleet median, when both exist.
    pub deviation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetRanking {
    /// Absent when fewer than two machines have a score.
    pub stats: Option<FleetStats>,
    pub machines: Vec<RankedMachine>,
}

impl FleetRanking {
    pub fn outliers(&self) -> impl Iterator<Item = &RankedMachine> + '_ {
        self.machines.iter().filter(|m| m.is_outlier)
    }
}

/// Median/MAD over the present scores. Needs at least two.
pub fn compute_fleet_stats(scores: &[f64]) -> Option<FleetStats> {
    let present: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if present.len() < 2 {
        return None;
    }
    let median = stats::median(&present)?;
    let mad = stats::median_absolute_deviation(&present, median)?;
    Some(FleetStats {
        median,
        mad,
        threshold: median - OUTLIER_MAD_MULTIPLIER * mad,
        sample_count: present.len(),
    })
}

/// Rank the fleet: gold standard first, then ascending score (worst first),
/// then machines without a score. Gold standard machines are never flagged.
pub fn rank_fleet(entries: &[FleetEntry]) -> FleetRanking {
    let scores: Vec<f64> = entries.iter().filter_map(FleetEntry::present_score).collect();
    let stats = compute_fleet_stats(&scores);

    let mut machines: Vec<RankedMachine> = entries
        .iter()
        .map(|e| {
            let score = e.present_score();
            let is_outlier = match (stats, score) {
                (Some(st), Some(s)) => !e.is_gold_standard && s < st.threshold,
                _ => false,
            };
            RankedMachine {
                machine_id: e.machine_id.clone(),
                score,
                is_gold_standard: e.is_gold_standard,
                is_outlier,
                deviation: stats.zip(score).map(|(st, s)| s - st.median),
            }
        })
        .collect();

    machines.sort_by(|a, b| {
        b.is_gold_standard
            .cmp(&a.is_gold_standard)
            .then_with(|| match (a.score, b.score) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });

    debug!(
        machines = machines.len(),
        scored = scores.len(),
        outliers = machines.iter().filter(|m| m.is_outlier).count(),
        "fleet_ranked"
    );

    FleetRanking { stats, machines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Vec<FleetEntry> {
        vec![
            FleetEntry::new("pump-a", Some(95.0)),
            FleetEntry::new("pump-b", Some(93.0)),
            FleetEntry::new("pump-c", Some(91.0)),
            FleetEntry::new("pump-d", Some(40.0)),
        ]
    }

    #[test]
    fn stats_of_reference_fleet() {
        let st = compute_fleet_stats(&[95.0, 93.0, 91.0, 40.0]).unwrap();
        assert_eq!(st.median, 92.0);
        assert_eq!(st.mad, 2.0);
        assert_eq!(st.threshold, 88.0);
        assert_eq!(st.sample_count, 4);
    }

    #[test]
    fn low_scorer_is_flagged() {
        let ranking = rank_fleet(&fleet());
        let flagged: Vec<&str> = ranking.outliers().map(|m| m.machine_id.as_str()).collect();
        assert_eq!(flagged, vec!["pump-d"]);
        // worst first
        assert_eq!(ranking.machines[0].machine_id, "pump-d");
        assert_eq!(ranking.machines[3].machine_id, "pump-a");
        assert_eq!(ranking.machines[0].deviation, Some(-52.0));
    }

    #[test]
    fn fewer_than_two_scores_gives_no_stats() {
        assert!(compute_fleet_stats(&[90.0]).is_none());
        assert!(compute_fleet_stats(&[]).is_none());
        let ranking = rank_fleet(&[
            FleetEntry::new("a", Some(10.0)),
            FleetEntry::new("b", None),
        ]);
        assert!(ranking.stats.is_none());
        assert_eq!(ranking.outliers().count(), 0);
    }

    #[test]
    fn gold_standard_leads_and_is_never_flagged() {
        let mut entries = fleet();
        entries[3] = FleetEntry::new("pump-d", Some(40.0)).gold_standard();
        let ranking = rank_fleet(&entries);
        assert_eq!(ranking.machines[0].machine_id, "pump-d");
        assert!(ranking.machines[0].is_gold_standard);
        assert!(!ranking.machines[0].is_outlier);
    }

    #[test]
    fn missing_scores_sort_last() {
        let mut entries = fleet();
        entries.insert(0, FleetEntry::new("pump-new", None));
        entries.push(FleetEntry::new("pump-nan", Some(f64::NAN)));
        let ranking = rank_fleet(&entries);
        let tail: Vec<&str> = ranking.machines[4..]
            .iter()
            .map(|m| m.machine_id.as_str())
            .collect();
        assert_eq!(tail, vec!["pump-new", "pump-nan"]);
        assert!(ranking.machines[4..].iter().all(|m| !m.is_outlier && m.score.is_none()));
        assert_eq!(ranking.stats.unwrap().median, 92.0);
    }

    #[test]
    fn identical_scores_flag_nobody() {
        let entries: Vec<FleetEntry> = (0..4)
            .map(|i| FleetEntry::new(format!("m{i}"), Some(80.0)))
            .collect();
        let ranking = rank_fleet(&entries);
        assert_eq!(ranking.stats.unwrap().mad, 0.0);
        assert_eq!(ranking.outliers().count(), 0);
    }
}
