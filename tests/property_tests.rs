//! Property-based tests for the pure parts of the engine.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use flowstage::core::{FlowHistory, Stage, StageRegistry, TransitionDef};
use flowstage::resolver::{find_transition, Trigger};
use flowstage::RetryPolicy;
use proptest::prelude::*;
use std::time::Duration;

prop_compose! {
    fn stage_name()(s in "[a-z]{1,8}") -> String {
        s
    }
}

prop_compose! {
    fn retry_policy()(
        max_retries in 0..10u32,
        base_ms in 1..1_000u64,
        max_ms in 1_000..60_000u64,
    ) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
        }
    }
}

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(policy in retry_policy(), attempt in 1..64u32) {
        let current = policy.backoff(attempt);
        let next = policy.backoff(attempt + 1);

        prop_assert!(next >= current);
        prop_assert!(current <= policy.max_delay);
        prop_assert!(current >= policy.base_delay.min(policy.max_delay));
    }

    #[test]
    fn backoff_first_attempt_is_base_delay(policy in retry_policy()) {
        prop_assert_eq!(
            policy.backoff(1),
            policy.base_delay.min(policy.max_delay)
        );
    }

    #[test]
    fn history_preserves_append_order(stages in prop::collection::vec(stage_name(), 0..32)) {
        let mut history = FlowHistory::new();
        for stage in &stages {
            history.record(stage.clone(), None);
        }

        prop_assert_eq!(history.len(), stages.len());
        let path: Vec<String> = history.stage_path().iter().map(|s| s.to_string()).collect();
        prop_assert_eq!(path, stages);
    }

    #[test]
    fn history_timestamps_never_decrease(stages in prop::collection::vec(stage_name(), 1..16)) {
        let mut history = FlowHistory::new();
        for stage in stages {
            history.record(stage, None);
        }

        let entries = history.entries();
        for pair in entries.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn resolver_is_deterministic_and_first_match(
        targets in prop::collection::vec(stage_name(), 1..8),
        event in stage_name(),
    ) {
        let mut stage = Stage::new("origin");
        for target in &targets {
            stage = stage.transition(TransitionDef::on(event.clone(), target.clone()));
        }

        let trigger = Trigger::Event(event);
        let first = find_transition(&stage, &trigger).map(|t| t.target.clone());
        let second = find_transition(&stage, &trigger).map(|t| t.target.clone());

        prop_assert_eq!(first.clone(), second);
        prop_assert_eq!(first, Some(targets[0].clone()));
    }

    #[test]
    fn resolver_never_matches_a_foreign_event(
        declared in stage_name(),
        asked in stage_name(),
    ) {
        prop_assume!(declared != asked);
        let stage = Stage::new("origin").transition(TransitionDef::on(declared, "somewhere"));
        prop_assert!(find_transition(&stage, &Trigger::Event(asked)).is_none());
    }

    #[test]
    fn registry_accepts_closed_graphs(names in prop::collection::hash_set(stage_name(), 1..12)) {
        let names: Vec<String> = names.into_iter().collect();
        let stages: Vec<Stage> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                // Every stage points at the next, wrapping around, so all
                // targets are declared.
                let target = &names[(i + 1) % names.len()];
                Stage::new(name.clone()).transition(TransitionDef::on("next", target.clone()))
            })
            .collect();

        let registry = StageRegistry::new(names[0].clone(), stages).unwrap();
        prop_assert_eq!(registry.len(), names.len());
        for name in &names {
            prop_assert!(registry.contains(name));
        }
    }

    #[test]
    fn timed_transition_match_requires_exact_delay(
        declared_ms in 1..10_000u64,
        asked_ms in 1..10_000u64,
    ) {
        let stage = Stage::new("origin")
            .transition(TransitionDef::after(Duration::from_millis(declared_ms), "next"));

        let trigger = Trigger::Timer {
            target: "next".to_string(),
            after: Duration::from_millis(asked_ms),
        };
        let found = find_transition(&stage, &trigger).is_some();
        prop_assert_eq!(found, declared_ms == asked_ms);
    }
}
