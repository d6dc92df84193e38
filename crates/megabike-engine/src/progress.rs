//! Round callback that logs progress and keeps running totals.

use megabike_core::dump::IterationDump;
use megabike_core::round::RoundSummary;
use megabike_core::runner::RoundCallback;
use megabike_core::state::SimulationState;
use tracing::{debug, info};

/// Totals accumulated over a run.
#[derive(Debug, Default)]
pub struct ProgressCallback {
    /// Agents that died.
    pub deaths: usize,
    /// Agents expelled by their crews.
    pub expulsions: usize,
    /// Pickups collected.
    pub pickups: usize,
}

impl RoundCallback for ProgressCallback {
    fn on_round(&mut self, summary: &RoundSummary, state: &SimulationState) {
        self.deaths = self.deaths.saturating_add(summary.deaths.len());
        self.expulsions = self.expulsions.saturating_add(summary.expelled.len());
        self.pickups = self.pickups.saturating_add(summary.pickups_collected);

        let seated = state.agents().values().filter(|b| b.on_bike).count();
        debug!(
            round = summary.round,
            agents_alive = summary.agents_alive,
            seated,
            joined = summary.admitted.len(),
            left = summary.left.len(),
            messages = summary.messages,
            "Round progress"
        );
    }

    fn on_iteration(&mut self, dump: &IterationDump) {
        info!(
            iteration = dump.index,
            deaths = self.deaths,
            expulsions = self.expulsions,
            pickups = self.pickups,
            "Running totals"
        );
    }
}
