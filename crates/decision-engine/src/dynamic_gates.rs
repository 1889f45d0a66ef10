//! Self-synthesized gates with a time-to-live.
//!
//! Gates are evicted lazily: nothing runs in the background, every read
//! that is given a clock first drops whatever has expired by then.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use analysis_core::{parse_pair, Direction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::models::{GateSeverity, TradeProposal};
use crate::RegistryError;

/// Why a dynamic gate exists. Older records store a bare string, newer ones
/// an object carrying at least a `reason` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateReason {
    Text(String),
    Structured {
        reason: String,
        #[serde(flatten)]
        details: Map<String, Value>,
    },
}

impl GateReason {
    pub fn text(&self) -> &str {
        match self {
            GateReason::Text(s) => s,
            GateReason::Structured { reason, .. } => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicGate {
    pub gate_id: String,
    /// Canonical pair, or `None` for a gate on every pair
    #[serde(default)]
    pub pair: Option<String>,
    /// Restrict to one side; `None` blocks both
    #[serde(default)]
    pub direction: Option<Direction>,
    pub reason: GateReason,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub severity: GateSeverity,
}

impl DynamicGate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn applies_to(&self, pair: &str) -> bool {
        self.pair.as_deref().map_or(true, |p| p == pair)
    }

    /// Registry has already filtered by pair and liveness; only direction is left.
    pub(crate) fn check(&self, proposal: &TradeProposal) -> (bool, String) {
        let triggered = self.direction.map_or(true, |d| d == proposal.direction);
        let scope = self.pair.as_deref().unwrap_or("all pairs");
        (
            triggered,
            format!(
                "{} ({}, until {})",
                self.reason.text(),
                scope,
                self.expires_at.to_rfc3339()
            ),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    Created,
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateAuditEntry {
    pub gate_id: String,
    pub event: AuditEvent,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub active: Vec<DynamicGate>,
    pub active_count: usize,
    pub total_gates_created: u64,
    pub audit_log: Vec<GateAuditEntry>,
}

/// What the decision engine needs from a dynamic gate store.
pub trait DynamicGateSource: Send + Sync {
    /// Drop gates expired at `now`; returns the evicted ids.
    fn evict_expired(&self, now: DateTime<Utc>) -> Vec<String>;

    /// Unexpired gates applying to `pair`, in id order.
    fn live_gates_for(&self, pair: &str, now: DateTime<Utc>) -> Vec<DynamicGate>;

    fn active_count(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Debug, Default)]
struct RegistryState {
    gates: BTreeMap<String, DynamicGate>,
    audit_log: Vec<GateAuditEntry>,
    total_created: u64,
}

impl RegistryState {
    fn evict(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .gates
            .values()
            .filter(|g| g.is_expired(now))
            .map(|g| g.gate_id.clone())
            .collect();
        for id in &expired {
            self.gates.remove(id);
            self.audit_log.push(GateAuditEntry {
                gate_id: id.clone(),
                event: AuditEvent::Evicted,
                at: now,
            });
        }
        expired
    }
}

/// In-process dynamic gate registry.
///
/// `total_gates_created` only ever grows. Eviction removes gates but never
/// touches the counter.
#[derive(Debug, Default)]
pub struct DynamicGateRegistry {
    state: RwLock<RegistryState>,
}

impl DynamicGateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("dynamic gate registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("dynamic gate registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn check_new(state: &RegistryState, gate: &DynamicGate) -> Result<(), RegistryError> {
        if gate.expires_at <= gate.created_at {
            return Err(RegistryError::InvalidExpiry(gate.gate_id.clone()));
        }
        if state.gates.contains_key(&gate.gate_id) {
            return Err(RegistryError::DuplicateGate(gate.gate_id.clone()));
        }
        if let Some(pair) = &gate.pair {
            let canonical_ok = parse_pair(pair)
                .map(|(b, q)| format!("{b}_{q}") == *pair)
                .unwrap_or(false);
            if !canonical_ok {
                return Err(RegistryError::InvalidPair {
                    gate_id: gate.gate_id.clone(),
                    pair: pair.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn add(&self, gate: DynamicGate) -> Result<(), RegistryError> {
        let mut state = self.write();
        Self::check_new(&state, &gate)?;
        info!(
            "dynamic gate {} created for {} until {}: {}",
            gate.gate_id,
            gate.pair.as_deref().unwrap_or("all pairs"),
            gate.expires_at,
            gate.reason.text()
        );
        state.audit_log.push(GateAuditEntry {
            gate_id: gate.gate_id.clone(),
            event: AuditEvent::Created,
            at: gate.created_at,
        });
        state.total_created += 1;
        state.gates.insert(gate.gate_id.clone(), gate);
        Ok(())
    }

    pub fn total_gates_created(&self) -> u64 {
        self.read().total_created
    }

    /// Evicts first, then reports what is left.
    pub fn snapshot(&self, now: DateTime<Utc>) -> RegistrySnapshot {
        let mut state = self.write();
        state.evict(now);
        RegistrySnapshot {
            active: state.gates.values().cloned().collect(),
            active_count: state.gates.len(),
            total_gates_created: state.total_created,
            audit_log: state.audit_log.clone(),
        }
    }

    /// Every stored gate, including ones that expired but were not yet evicted.
    pub fn export_records(&self) -> Vec<DynamicGate> {
        self.read().gates.values().cloned().collect()
    }

    /// Reload exported records. Expired or invalid ones are skipped with a
    /// warning; returns how many were restored.
    pub fn restore(&self, records: Vec<DynamicGate>, now: DateTime<Utc>) -> usize {
        let mut restored = 0;
        for gate in records {
            if gate.is_expired(now) {
                debug!("skipping expired dynamic gate {}", gate.gate_id);
                continue;
            }
            match self.add(gate) {
                Ok(()) => restored += 1,
                Err(e) => warn!("skipping dynamic gate record: {}", e),
            }
        }
        restored
    }

    /// Parse a JSON array of records and restore them. Only a malformed
    /// array is an error; malformed records are skipped with a warning.
    pub fn restore_json(&self, json: &str, now: DateTime<Utc>) -> Result<usize, serde_json::Error> {
        let values: Vec<Value> = serde_json::from_str(json)?;
        let mut records = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<DynamicGate>(value) {
                Ok(gate) => records.push(gate),
                Err(e) => {
                    warn!("skipping malformed dynamic gate record #{}: {}", i, e);
                    continue;
                }
            }
        }
        Ok(self.restore(records, now))
    }
}

impl DynamicGateSource for DynamicGateRegistry {
    fn evict_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        // Readers don't need the write lock when nothing has expired.
        if !self.read().gates.values().any(|g| g.is_expired(now)) {
            return Vec::new();
        }
        let evicted = self.write().evict(now);
        if !evicted.is_empty() {
            debug!("evicted {} expired dynamic gates", evicted.len());
        }
        evicted
    }

    fn live_gates_for(&self, pair: &str, now: DateTime<Utc>) -> Vec<DynamicGate> {
        self.read()
            .gates
            .values()
            .filter(|g| !g.is_expired(now) && g.applies_to(pair))
            .cloned()
            .collect()
    }

    fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.read().gates.values().filter(|g| !g.is_expired(now)).count()
    }
}
