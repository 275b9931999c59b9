//! Prometheus metrics for Broadside.
//!
//! Counters are bumped as events happen; gauges are refreshed from the lobby
//! right before each scrape.
//!
//! ```rust,ignore
//! let metrics = Metrics::new()?;
//! metrics.moves_total.inc();
//! let output = metrics.gather();
//! ```

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::game::FinishReason;
use crate::lobby::{LobbyStats, Stat};

/// Session server metrics.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Open WebSocket connections.
    pub connections_active: IntGauge,
    /// Registered (online) users.
    pub users_online: IntGauge,
    /// Game sessions not yet finished.
    pub games_active: IntGauge,

    /// Invitations by outcome (sent, accepted, declined, expired).
    pub invitations_total: IntCounterVec,
    /// Finished games by reason.
    pub games_finished_total: IntCounterVec,
    /// Shots fired.
    pub moves_total: IntCounter,
    /// Client messages dropped (malformed, rate_limited).
    pub messages_rejected_total: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_active = IntGauge::new("broadside_connections_active", "Open WebSocket connections")?;
        registry.register(Box::new(connections_active.clone()))?;

        let users_online = IntGauge::new("broadside_users_online", "Registered users online")?;
        registry.register(Box::new(users_online.clone()))?;

        let games_active = IntGauge::new("broadside_games_active", "Game sessions not yet finished")?;
        registry.register(Box::new(games_active.clone()))?;

        let invitations_total = IntCounterVec::new(
            Opts::new("broadside_invitations_total", "Invitations by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(invitations_total.clone()))?;

        let games_finished_total = IntCounterVec::new(
            Opts::new("broadside_games_finished_total", "Finished games by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(games_finished_total.clone()))?;

        let moves_total = IntCounter::new("broadside_moves_total", "Shots fired")?;
        registry.register(Box::new(moves_total.clone()))?;

        let messages_rejected_total = IntCounterVec::new(
            Opts::new("broadside_messages_rejected_total", "Client messages dropped"),
            &["reason"],
        )?;
        registry.register(Box::new(messages_rejected_total.clone()))?;

        Ok(Self {
            registry,
            connections_active,
            users_online,
            games_active,
            invitations_total,
            games_finished_total,
            moves_total,
            messages_rejected_total,
        })
    }

    pub fn observe(&self, stat: Stat) {
        match stat {
            Stat::Invitation(outcome) => self.invitations_total.with_label_values(&[outcome]).inc(),
            Stat::GameFinished(reason) => {
                let label = match reason {
                    FinishReason::AllSunk => "all_sunk",
                    FinishReason::Surrender => "surrender",
                    FinishReason::Disconnect => "disconnect",
                };
                self.games_finished_total.with_label_values(&[label]).inc();
            }
            Stat::Move => self.moves_total.inc(),
            Stat::Rejected(reason) => self.messages_rejected_total.with_label_values(&[reason]).inc(),
        }
    }

    /// Refresh gauges from a lobby snapshot.
    pub fn update(&self, stats: &LobbyStats) {
        self.connections_active.set(stats.connections as i64);
        self.users_online.set(stats.users_online as i64);
        self.games_active.set(stats.games_active as i64);
    }

    /// Gather all metrics in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.update(&LobbyStats {
            connections: 5,
            users_online: 3,
            games_active: 1,
        });

        let output = metrics.gather();
        assert!(output.contains("broadside_connections_active 5"));
        assert!(output.contains("broadside_users_online 3"));
        assert!(output.contains("broadside_games_active 1"));
    }

    #[test]
    fn test_observe() {
        let metrics = Metrics::new().unwrap();
        metrics.observe(Stat::Invitation("sent"));
        metrics.observe(Stat::Invitation("sent"));
        metrics.observe(Stat::GameFinished(FinishReason::Surrender));
        metrics.observe(Stat::Move);
        metrics.observe(Stat::Rejected("malformed"));

        let output = metrics.gather();
        assert!(output.contains("broadside_invitations_total{outcome=\"sent\"} 2"));
        assert!(output.contains("broadside_games_finished_total{reason=\"surrender\"} 1"));
        assert!(output.contains("broadside_moves_total 1"));
        assert!(output.contains("broadside_messages_rejected_total{reason=\"malformed\"} 1"));
    }
}
