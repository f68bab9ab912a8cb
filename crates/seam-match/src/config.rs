//! Tuned matching thresholds.
//!
//! These constants are empirically tuned; behavioral compatibility, not
//! optimality, is the goal, so they are carried as named overridable
//! values rather than re-derived.

/// Thresholds governing acceptance and the performance escape valves.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Residual score granted to a composite pair whose child score is
    /// zero but which one of the closed override conditions supports.
    pub soft_accept_score: f64,
    /// When both bodies exceed this statement count and are not
    /// hash-identical, leaf matching is skipped entirely.
    pub statement_count_ceiling: usize,
    /// Lambda/anonymous bodies are flattened into the matching pools only
    /// while the two sides' total node counts stay within this ratio.
    pub collapse_node_ratio: f64,
    /// A replacement set explaining more than this fraction of the longer
    /// text is rejected as "no correspondence".
    pub max_replacement_ratio: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            soft_accept_score: 0.99,
            statement_count_ceiling: 2000,
            collapse_node_ratio: 2.0,
            max_replacement_ratio: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_tuned_values() {
        let config = MatchConfig::default();
        assert_eq!(config.soft_accept_score, 0.99);
        assert_eq!(config.statement_count_ceiling, 2000);
        assert_eq!(config.collapse_node_ratio, 2.0);
    }
}
