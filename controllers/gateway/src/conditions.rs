//! Condition merging
//!
//! Pure helpers for maintaining the per-object condition lists. The
//! `changed` flag returned by [`merge`] gates whether a status write is
//! issued at all, which keeps repeated reconciles of unchanged state from
//! producing update storms and resourceVersion conflicts.

use crds::{Condition, ConditionStatus};

/// Condition type reported on GatewayClass and (per parent) HTTPRoute.
pub const ACCEPTED: &str = "Accepted";
/// Condition type reported on Gateway once infrastructure is provisioned.
pub const SCHEDULED: &str = "Scheduled";
/// Condition type reported on Gateway once traffic can be served.
pub const READY: &str = "Ready";

/// Merges `candidate` into `existing`, keyed by condition type.
///
/// Replaces the same-type entry when status, reason, message, or observed
/// generation differ; appends when no entry of that type exists. When only
/// non-status fields changed, the previous `lastTransitionTime` is kept so
/// the transition timestamp tracks actual status flips. Merging an
/// identical condition returns the input unchanged with `changed == false`.
pub fn merge(existing: &[Condition], candidate: Condition) -> (Vec<Condition>, bool) {
    let mut merged = Vec::with_capacity(existing.len() + 1);
    let mut changed = false;
    let mut found = false;

    for cond in existing {
        if cond.type_ != candidate.type_ {
            merged.push(cond.clone());
            continue;
        }
        // Duplicate entries of the same type collapse into one.
        if found {
            changed = true;
            continue;
        }
        found = true;

        if cond.status == candidate.status
            && cond.reason == candidate.reason
            && cond.message == candidate.message
            && cond.observed_generation == candidate.observed_generation
        {
            merged.push(cond.clone());
            continue;
        }

        let mut replacement = candidate.clone();
        if cond.status == candidate.status {
            replacement.last_transition_time = cond.last_transition_time;
        }
        merged.push(replacement);
        changed = true;
    }

    if !found {
        merged.push(candidate);
        changed = true;
    }

    (merged, changed)
}

/// Finds the condition with the given type, if present.
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition is present with status True.
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// True when the condition is True and was computed from `generation`.
pub fn is_true_for_generation(conditions: &[Condition], type_: &str, generation: Option<i64>) -> bool {
    find(conditions, type_)
        .is_some_and(|c| c.status == ConditionStatus::True && c.observed_generation == generation)
}
