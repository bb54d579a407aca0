use tracing::info;

/// Failures in a row before moving to the next strategy
pub const FAILURES_BEFORE_ESCALATION: u32 = 2;
/// History occupancy that forces strategy 0 to widen before searching
pub const LOOP_OCCUPANCY: f64 = 0.8;
/// History occupancy under which a widened strategy returns to 0
pub const NORMAL_OCCUPANCY: f64 = 0.5;

/// How far the generated query may drift from the reference track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    #[default]
    VerySimilar,
    ExpandGenre,
    AdjacentGenre,
    Broad,
}

impl SearchStrategy {
    pub fn index(self) -> u8 {
        match self {
            SearchStrategy::VerySimilar => 0,
            SearchStrategy::ExpandGenre => 1,
            SearchStrategy::AdjacentGenre => 2,
            SearchStrategy::Broad => 3,
        }
    }

    pub fn from_index(index: u8) -> Self {
        match index % 4 {
            0 => SearchStrategy::VerySimilar,
            1 => SearchStrategy::ExpandGenre,
            2 => SearchStrategy::AdjacentGenre,
            _ => SearchStrategy::Broad,
        }
    }

    /// Wraps around after `Broad`.
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    /// Sampling temperature for query generation, more creative as it widens.
    pub fn temperature(self) -> f32 {
        0.3 + 0.2 * self.index() as f32
    }

    pub fn description(self) -> &'static str {
        match self {
            SearchStrategy::VerySimilar => "very similar songs (same genre and style)",
            SearchStrategy::ExpandGenre => "slightly wider genre (related artists)",
            SearchStrategy::AdjacentGenre => "adjacent genres (diversify)",
            SearchStrategy::Broad => "something broad and different (break the loop)",
        }
    }
}

/// Per-player strategy knob plus its consecutive-failure counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyState {
    pub strategy: SearchStrategy,
    pub failures: u32,
}

impl StrategyState {
    /// Anti-loop check run before every search.
    pub fn before_search(&mut self, occupancy: f64) {
        if occupancy > LOOP_OCCUPANCY && self.strategy == SearchStrategy::VerySimilar {
            self.strategy = SearchStrategy::ExpandGenre;
            info!("🔄 Historial alto ({:.0}%), cambiando a estrategia 1", occupancy * 100.0);
        }
    }

    pub fn on_success(&mut self, occupancy: f64) {
        self.failures = 0;
        if self.strategy != SearchStrategy::VerySimilar && occupancy < NORMAL_OCCUPANCY {
            self.strategy = SearchStrategy::VerySimilar;
            info!("✅ Historial normalizado ({:.0}%), volviendo a estrategia 0", occupancy * 100.0);
        }
    }

    /// Counts a failed attempt. Returns true when the strategy escalated and
    /// the pipeline should retry once.
    pub fn on_failure(&mut self) -> bool {
        self.failures += 1;
        if self.failures < FAILURES_BEFORE_ESCALATION {
            return false;
        }

        self.strategy = self.strategy.next();
        self.failures = 0;
        info!("🔄 Cambiando a estrategia {}", self.strategy.index());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escalates_after_two_failures_and_wraps() {
        let mut state = StrategyState::default();
        assert!(!state.on_failure());
        assert_eq!(state.failures, 1);
        assert!(state.on_failure());
        assert_eq!(state.strategy, SearchStrategy::ExpandGenre);
        assert_eq!(state.failures, 0);

        state.strategy = SearchStrategy::Broad;
        state.on_failure();
        state.on_failure();
        assert_eq!(state.strategy, SearchStrategy::VerySimilar);
    }

    #[test]
    fn crowded_history_widens_only_from_the_first_strategy() {
        let mut state = StrategyState::default();
        state.before_search(0.8);
        assert_eq!(state.strategy, SearchStrategy::VerySimilar);
        state.before_search(0.81);
        assert_eq!(state.strategy, SearchStrategy::ExpandGenre);

        state.strategy = SearchStrategy::AdjacentGenre;
        state.before_search(0.95);
        assert_eq!(state.strategy, SearchStrategy::AdjacentGenre);
    }

    #[test]
    fn success_with_sparse_history_returns_to_first_strategy() {
        let mut state = StrategyState {
            strategy: SearchStrategy::Broad,
            failures: 1,
        };
        state.on_success(0.6);
        assert_eq!(state.strategy, SearchStrategy::Broad);
        assert_eq!(state.failures, 0);

        state.on_success(0.3);
        assert_eq!(state.strategy, SearchStrategy::VerySimilar);
    }

    #[test]
    fn temperature_grows_with_strategy() {
        assert!((SearchStrategy::VerySimilar.temperature() - 0.3).abs() < f32::EPSILON);
        assert!((SearchStrategy::Broad.temperature() - 0.9).abs() < 1e-6);
    }
}
