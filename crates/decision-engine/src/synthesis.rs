//! Turns realised trade outcomes into dynamic gates.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::warn;

use crate::dynamic_gates::{DynamicGate, DynamicGateRegistry, GateReason};
use crate::models::GateSeverity;
use crate::DecisionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisPolicyConfig {
    pub enabled: bool,
    /// Consecutive losses on one pair before that pair is gated
    pub pair_loss_streak: u32,
    /// Consecutive losses across all pairs before everything is gated
    pub global_loss_streak: u32,
    pub pair_gate_ttl_minutes: i64,
    pub global_gate_ttl_minutes: i64,
}

impl Default for SynthesisPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pair_loss_streak: 3,
            global_loss_streak: 6,
            pair_gate_ttl_minutes: 240,
            global_gate_ttl_minutes: 120,
        }
    }
}

impl SynthesisPolicyConfig {
    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.pair_loss_streak == 0 || self.global_loss_streak == 0 {
            return Err(DecisionError::InvalidConfig(
                "loss streak lengths must be at least 1".to_string(),
            ));
        }
        if self.pair_gate_ttl_minutes <= 0 || self.global_gate_ttl_minutes <= 0 {
            return Err(DecisionError::InvalidConfig(
                "dynamic gate TTLs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Watches closed trades and gates pairs (or everything) after loss streaks.
///
/// Time always comes from the caller so backtests synthesize on bar time.
#[derive(Debug)]
pub struct LossStreakSynthesizer {
    config: SynthesisPolicyConfig,
    pair_streaks: HashMap<String, u32>,
    global_streak: u32,
    next_id: u64,
}

impl LossStreakSynthesizer {
    pub fn new(config: SynthesisPolicyConfig) -> Self {
        Self {
            config,
            pair_streaks: HashMap::new(),
            global_streak: 0,
            next_id: 1,
        }
    }

    pub fn config(&self) -> &SynthesisPolicyConfig {
        &self.config
    }

    /// Record one closed trade. Wins reset the streaks, scratch trades are
    /// ignored. Returns the gates added to `registry`.
    pub fn observe(
        &mut self,
        pair: &str,
        pips: f64,
        at: DateTime<Utc>,
        registry: &DynamicGateRegistry,
    ) -> Vec<DynamicGate> {
        if !self.config.enabled || pips == 0.0 || !pips.is_finite() {
            return Vec::new();
        }

        if pips > 0.0 {
            self.pair_streaks.remove(pair);
            self.global_streak = 0;
            return Vec::new();
        }

        let mut created = Vec::new();

        let streak = self.pair_streaks.entry(pair.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= self.config.pair_loss_streak {
            let losses = *streak;
            *streak = 0;
            let gate = self.build(
                Some(pair),
                losses,
                at,
                Duration::minutes(self.config.pair_gate_ttl_minutes),
            );
            created.extend(self.register(gate, registry));
        }

        self.global_streak += 1;
        if self.global_streak >= self.config.global_loss_streak {
            let losses = self.global_streak;
            self.global_streak = 0;
            let gate = self.build(
                None,
                losses,
                at,
                Duration::minutes(self.config.global_gate_ttl_minutes),
            );
            created.extend(self.register(gate, registry));
        }

        created
    }

    fn build(
        &mut self,
        pair: Option<&str>,
        losses: u32,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> DynamicGate {
        let scope = pair.unwrap_or("GLOBAL");
        let gate_id = format!("DG-{:04}-{}", self.next_id, scope);
        self.next_id += 1;

        let mut details = Map::new();
        details.insert("consecutiveLosses".to_string(), json!(losses));
        details.insert("scope".to_string(), json!(scope));

        DynamicGate {
            gate_id,
            pair: pair.map(str::to_string),
            direction: None,
            reason: GateReason::Structured {
                reason: format!("{losses} consecutive losses on {}", pair.unwrap_or("all pairs")),
                details,
            },
            created_at: at,
            expires_at: at + ttl,
            severity: GateSeverity::Blocking,
        }
    }

    fn register(&self, gate: DynamicGate, registry: &DynamicGateRegistry) -> Option<DynamicGate> {
        match registry.add(gate.clone()) {
            Ok(()) => Some(gate),
            Err(e) => {
                warn!("could not register synthesized gate: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DynamicGateSource;
    use chrono::TimeZone;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn pair_streak_creates_gate() {
        let reg = DynamicGateRegistry::new();
        let mut synth = LossStreakSynthesizer::new(SynthesisPolicyConfig::default());
        assert!(synth.observe("EUR_USD", -4.0, t(0), &reg).is_empty());
        assert!(synth.observe("EUR_USD", -3.0, t(15), &reg).is_empty());
        let gates = synth.observe("EUR_USD", -5.0, t(30), &reg);
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].gate_id, "DG-0001-EUR_USD");
        assert_eq!(gates[0].expires_at, t(30) + Duration::minutes(240));
        assert_eq!(reg.live_gates_for("EUR_USD", t(45)).len(), 1);
        assert!(reg.live_gates_for("GBP_USD", t(45)).is_empty());
    }

    #[test]
    fn wins_and_scratches() {
        let reg = DynamicGateRegistry::new();
        let mut synth = LossStreakSynthesizer::new(SynthesisPolicyConfig::default());
        synth.observe("EUR_USD", -4.0, t(0), &reg);
        synth.observe("EUR_USD", -4.0, t(1), &reg);
        synth.observe("EUR_USD", 0.0, t(2), &reg);
        synth.observe("EUR_USD", 6.0, t(3), &reg);
        synth.observe("EUR_USD", -4.0, t(4), &reg);
        assert_eq!(reg.total_gates_created(), 0);
    }

    #[test]
    fn global_streak_spans_pairs() {
        let reg = DynamicGateRegistry::new();
        let mut synth = LossStreakSynthesizer::new(SynthesisPolicyConfig {
            pair_loss_streak: 10,
            global_loss_streak: 4,
            ..SynthesisPolicyConfig::default()
        });
        let pairs = ["EUR_USD", "GBP_USD", "USD_JPY", "AUD_USD"];
        let mut created = Vec::new();
        for (i, pair) in pairs.iter().enumerate() {
            created.extend(synth.observe(pair, -2.0, t(i as i64), &reg));
        }
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].gate_id, "DG-0001-GLOBAL");
        assert!(created[0].pair.is_none());
        assert_eq!(reg.live_gates_for("NZD_USD", t(10)).len(), 1);
    }

    #[test]
    fn disabled_policy_is_inert() {
        let reg = DynamicGateRegistry::new();
        let mut synth = LossStreakSynthesizer::new(SynthesisPolicyConfig {
            enabled: false,
            ..SynthesisPolicyConfig::default()
        });
        for i in 0..10 {
            synth.observe("EUR_USD", -1.0, t(i), &reg);
        }
        assert_eq!(reg.total_gates_created(), 0);
    }
}
