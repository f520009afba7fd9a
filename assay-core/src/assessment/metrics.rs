//! Aggregation metrics.
//!
//! A node's performance, confidence, competence, trend and priority are a
//! deterministic function of its children's assessments. The functions are
//! pluggable through [`AggregationMetrics`]; [`DefaultMetrics`] implements
//! the weighted-score rule:
//!
//! ```text
//! score(BELOW) = 0   score(AT) = 2   score(ABOVE) = 4   UNKNOWN is skipped
//!
//! weights     = authored weights if every child has one, else 1/n each
//! considered  = sum of weights of children with a known level
//! normalized  = sum(weight * score) / considered      (both rounded to 2dp)
//!
//! considered < 0.01   -> UNKNOWN
//! normalized < 2.0    -> BELOW_EXPECTATION
//! normalized >= 3.33  -> ABOVE_EXPECTATION
//! otherwise           -> AT_EXPECTATION
//! ```

use crate::types::{AssessmentLevel, StrategyApplied};

/// Upper bound (exclusive) of the normalized score for BELOW_EXPECTATION.
pub const BELOW_EXPECTATION_UPPER_THRESHOLD: f64 = 2.0;

/// Lower bound (inclusive) of the normalized score for ABOVE_EXPECTATION.
pub const AT_EXPECTATION_UPPER_THRESHOLD: f64 = 3.33;

/// Smallest weight that still counts as evidence.
const MIN_CONSIDERED_WEIGHT: f64 = 0.01;

/// One child's contribution to an aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildAssessment {
    pub level: AssessmentLevel,
    pub confidence: f32,
    pub competence: f32,
    pub trend: f32,
    pub priority: Option<i32>,
    /// Authored weight in [0, 1], if any.
    pub weight: Option<f64>,
}

impl ChildAssessment {
    pub fn new(level: AssessmentLevel) -> Self {
        Self {
            level,
            confidence: 1.0,
            competence: 1.0,
            trend: 0.0,
            priority: None,
            weight: None,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: Option<f64>) -> Self {
        self.weight = weight;
        self
    }
}

/// Pluggable aggregation functions.
pub trait AggregationMetrics: Send + Sync {
    fn performance(&self, children: &[ChildAssessment]) -> AssessmentLevel;

    fn confidence(&self, children: &[ChildAssessment]) -> f32;

    fn competence(&self, children: &[ChildAssessment]) -> f32;

    fn trend(&self, children: &[ChildAssessment]) -> f32;

    /// Aggregate priority, given the node's own authored priority.
    fn priority(&self, children: &[ChildAssessment], authored: Option<i32>) -> Option<i32>;

    /// New task stress after a strategy was applied.
    fn stress(&self, current: Option<f64>, strategy: &StrategyApplied) -> Option<f64>;

    /// New task difficulty after a strategy was applied.
    fn difficulty(&self, current: Option<f64>, strategy: &StrategyApplied) -> Option<f64>;
}

/// Weighted-score performance with averaged secondary metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMetrics;

impl DefaultMetrics {
    /// Map a weighted score onto a level.
    ///
    /// `considered` is the total weight of children with a known level and
    /// `score` the weighted sum of their scores.
    pub fn level_from_score(considered: f64, score: f64) -> AssessmentLevel {
        let considered = round2(considered);
        let score = round2(score);

        if considered < MIN_CONSIDERED_WEIGHT {
            return AssessmentLevel::Unknown;
        }

        let normalized = score / considered;
        if normalized < BELOW_EXPECTATION_UPPER_THRESHOLD {
            AssessmentLevel::BelowExpectation
        } else if normalized >= AT_EXPECTATION_UPPER_THRESHOLD {
            AssessmentLevel::AboveExpectation
        } else {
            // Round down to AT rather than hand out ABOVE
            AssessmentLevel::AtExpectation
        }
    }

    fn weights(children: &[ChildAssessment]) -> Vec<f64> {
        let all_weighted = children.iter().all(|c| c.weight.is_some());
        if all_weighted {
            children.iter().map(|c| c.weight.unwrap_or(0.0)).collect()
        } else {
            let even = 1.0 / children.len() as f64;
            vec![even; children.len()]
        }
    }

    fn mean_of_known(
        children: &[ChildAssessment],
        f: impl Fn(&ChildAssessment) -> f32,
        empty: f32,
    ) -> f32 {
        let known: Vec<f32> = children
            .iter()
            .filter(|c| c.level != AssessmentLevel::Unknown)
            .map(f)
            .collect();
        if known.is_empty() {
            empty
        } else {
            known.iter().sum::<f32>() / known.len() as f32
        }
    }
}

impl AggregationMetrics for DefaultMetrics {
    fn performance(&self, children: &[ChildAssessment]) -> AssessmentLevel {
        if children.is_empty() {
            return AssessmentLevel::Unknown;
        }

        let weights = Self::weights(children);
        let mut considered = 0.0;
        let mut score = 0.0;
        for (child, weight) in children.iter().zip(weights) {
            if let Some(value) = child.level.score() {
                considered += weight;
                score += weight * value;
            }
        }

        Self::level_from_score(considered, score)
    }

    fn confidence(&self, children: &[ChildAssessment]) -> f32 {
        Self::mean_of_known(children, |c| c.confidence, 1.0)
    }

    fn competence(&self, children: &[ChildAssessment]) -> f32 {
        Self::mean_of_known(children, |c| c.competence, 1.0)
    }

    fn trend(&self, children: &[ChildAssessment]) -> f32 {
        Self::mean_of_known(children, |c| c.trend, 0.0)
    }

    fn priority(&self, children: &[ChildAssessment], authored: Option<i32>) -> Option<i32> {
        // Lower number is more urgent
        children
            .iter()
            .filter_map(|c| c.priority)
            .chain(authored)
            .min()
    }

    fn stress(&self, current: Option<f64>, strategy: &StrategyApplied) -> Option<f64> {
        strategy.stress.map(|s| s.clamp(0.0, 1.0)).or(current)
    }

    fn difficulty(&self, current: Option<f64>, strategy: &StrategyApplied) -> Option<f64> {
        strategy.difficulty.map(|d| d.clamp(0.0, 1.0)).or(current)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssessmentLevel::*;

    fn levels(levels: &[AssessmentLevel]) -> Vec<ChildAssessment> {
        levels.iter().copied().map(ChildAssessment::new).collect()
    }

    #[test]
    fn no_children_is_unknown() {
        assert_eq!(DefaultMetrics.performance(&[]), Unknown);
    }

    #[test]
    fn all_unknown_is_unknown() {
        assert_eq!(DefaultMetrics.performance(&levels(&[Unknown, Unknown])), Unknown);
    }

    #[test]
    fn single_child_maps_to_itself() {
        for level in [BelowExpectation, AtExpectation, AboveExpectation] {
            assert_eq!(DefaultMetrics.performance(&levels(&[level])), level);
        }
    }

    #[test]
    fn below_and_above_average_to_at() {
        // (0 + 4) / 2 = 2.0, which is AT
        let result = DefaultMetrics.performance(&levels(&[BelowExpectation, AboveExpectation]));
        assert_eq!(result, AtExpectation);
        // Order does not matter
        let result = DefaultMetrics.performance(&levels(&[AboveExpectation, BelowExpectation]));
        assert_eq!(result, AtExpectation);
    }

    #[test]
    fn unknown_children_do_not_drag_the_score_down() {
        let result = DefaultMetrics.performance(&levels(&[AtExpectation, Unknown]));
        assert_eq!(result, AtExpectation);
        let result = DefaultMetrics.performance(&levels(&[AboveExpectation, Unknown, Unknown]));
        assert_eq!(result, AboveExpectation);
    }

    #[test]
    fn thirds_round_before_thresholding() {
        // Three even children: 1/3 * (2 + 4 + 4) = 3.333.. -> 3.33 -> ABOVE
        let children = levels(&[AtExpectation, AboveExpectation, AboveExpectation]);
        let result = DefaultMetrics.performance(&children);
        assert_eq!(result, AboveExpectation);
    }

    #[test]
    fn authored_weights_used_when_complete() {
        let children = vec![
            ChildAssessment::new(BelowExpectation).with_weight(Some(0.2)),
            ChildAssessment::new(AboveExpectation).with_weight(Some(0.8)),
        ];
        // 0.8 * 4 = 3.2 -> AT
        assert_eq!(DefaultMetrics.performance(&children), AtExpectation);

        let children = vec![
            ChildAssessment::new(BelowExpectation).with_weight(Some(0.9)),
            ChildAssessment::new(AboveExpectation).with_weight(Some(0.1)),
        ];
        // 0.1 * 4 = 0.4 -> BELOW
        assert_eq!(DefaultMetrics.performance(&children), BelowExpectation);
    }

    #[test]
    fn partial_weights_fall_back_to_even() {
        let children = vec![
            ChildAssessment::new(BelowExpectation).with_weight(Some(0.9)),
            ChildAssessment::new(AboveExpectation),
        ];
        assert_eq!(DefaultMetrics.performance(&children), AtExpectation);
    }

    #[test]
    fn level_from_score_thresholds() {
        assert_eq!(DefaultMetrics::level_from_score(0.0, 0.0), Unknown);
        assert_eq!(DefaultMetrics::level_from_score(0.004, 0.016), Unknown);
        assert_eq!(DefaultMetrics::level_from_score(1.0, 1.99), BelowExpectation);
        assert_eq!(DefaultMetrics::level_from_score(1.0, 1.999_999_7), AtExpectation);
        assert_eq!(DefaultMetrics::level_from_score(1.0, 3.32), AtExpectation);
        assert_eq!(DefaultMetrics::level_from_score(1.0, 3.33), AboveExpectation);
    }

    #[test]
    fn secondary_metrics_average_known_children() {
        let mut a = ChildAssessment::new(AtExpectation);
        a.confidence = 0.5;
        a.trend = 1.0;
        let mut b = ChildAssessment::new(AboveExpectation);
        b.confidence = 1.0;
        b.trend = -1.0;
        let mut c = ChildAssessment::new(Unknown);
        c.confidence = 0.0;

        let children = vec![a, b, c];
        assert!((DefaultMetrics.confidence(&children) - 0.75).abs() < f32::EPSILON);
        assert!(DefaultMetrics.trend(&children).abs() < f32::EPSILON);
        assert!((DefaultMetrics.competence(&children) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn priority_is_most_urgent() {
        let mut a = ChildAssessment::new(AtExpectation);
        a.priority = Some(3);
        let mut b = ChildAssessment::new(AtExpectation);
        b.priority = Some(1);
        assert_eq!(DefaultMetrics.priority(&[a, b], Some(2)), Some(1));
        assert_eq!(DefaultMetrics.priority(&[], Some(2)), Some(2));
        assert_eq!(DefaultMetrics.priority(&[], None), None);
    }

    #[test]
    fn strategy_stress_is_clamped() {
        let mut strategy = StrategyApplied::new("raise stress");
        strategy.stress = Some(1.4);
        assert_eq!(DefaultMetrics.stress(Some(0.2), &strategy), Some(1.0));
        strategy.stress = None;
        assert_eq!(DefaultMetrics.stress(Some(0.2), &strategy), Some(0.2));
    }
}
