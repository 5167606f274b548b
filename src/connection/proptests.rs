//! Property-based tests for connection transitions

use super::*;
use crate::config::ConnectionConfig;
use proptest::prelude::*;
use std::time::Duration;

fn arb_state() -> impl Strategy<Value = ConnectionState> {
    prop_oneof![
        Just(ConnectionState::Disconnected),
        Just(ConnectionState::Connecting),
        Just(ConnectionState::Connected),
        Just(ConnectionState::Error),
    ]
}

fn arb_event() -> impl Strategy<Value = ConnectionEvent> {
    prop_oneof![
        Just(ConnectionEvent::ConnectRequested),
        Just(ConnectionEvent::Connected),
        "[a-z ]{1,20}".prop_map(|reason| ConnectionEvent::ConnectFailed { reason }),
        Just(ConnectionEvent::Disconnected),
        Just(ConnectionEvent::ReconnectDue),
        Just(ConnectionEvent::Closed),
    ]
}

fn arb_config() -> impl Strategy<Value = ConnectionConfig> {
    (0u32..8, 1u64..5000).prop_map(|(max_reconnect_attempts, delay_ms)| ConnectionConfig {
        max_reconnect_attempts,
        reconnect_delay: Duration::from_millis(delay_ms),
        ..ConnectionConfig::default()
    })
}

fn schedules(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::ScheduleReconnect { .. }))
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_budget_never_exceeds_max(
        config in arb_config(),
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let mut state = ConnectionState::Disconnected;
        let mut budget = ReconnectBudget::new(config.max_reconnect_attempts);

        for event in events {
            if let Ok(result) = transition(state, budget, &config, event) {
                state = result.new_state;
                budget = result.budget;
            }
            prop_assert!(budget.attempts <= config.max_reconnect_attempts);
        }
    }

    #[test]
    fn prop_total_reconnects_bounded_without_success(
        config in arb_config(),
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let mut state = ConnectionState::Disconnected;
        let mut budget = ReconnectBudget::new(config.max_reconnect_attempts);
        let mut scheduled = 0usize;

        for event in events {
            // Only count runs with no success and no close in between
            if matches!(event, ConnectionEvent::Connected | ConnectionEvent::Closed) {
                continue;
            }
            if let Ok(result) = transition(state, budget, &config, event) {
                scheduled += schedules(&result.effects);
                state = result.new_state;
                budget = result.budget;
            }
        }
        prop_assert!(scheduled <= config.max_reconnect_attempts as usize);
    }

    #[test]
    fn prop_at_most_one_schedule_per_transition(
        state in arb_state(),
        attempts in 0u32..10,
        config in arb_config(),
        event in arb_event(),
    ) {
        let budget = ReconnectBudget {
            attempts: attempts.min(config.max_reconnect_attempts),
            max_attempts: config.max_reconnect_attempts,
        };
        if let Ok(result) = transition(state, budget, &config, event) {
            prop_assert!(schedules(&result.effects) <= 1);
            if !budget.has_remaining() {
                prop_assert_eq!(schedules(&result.effects), 0);
            }
        }
    }

    #[test]
    fn prop_close_always_disconnects(
        state in arb_state(),
        attempts in 0u32..10,
        config in arb_config(),
    ) {
        let budget = ReconnectBudget { attempts, max_attempts: config.max_reconnect_attempts };
        let result = transition(state, budget, &config, ConnectionEvent::Closed).unwrap();
        prop_assert_eq!(result.new_state, ConnectionState::Disconnected);
        prop_assert_eq!(result.budget.attempts, 0);
        prop_assert!(result.effects.contains(&Effect::CancelReconnect));
    }

    #[test]
    fn prop_transition_is_deterministic(
        state in arb_state(),
        attempts in 0u32..10,
        config in arb_config(),
        event in arb_event(),
    ) {
        let budget = ReconnectBudget { attempts, max_attempts: config.max_reconnect_attempts };
        let first = transition(state, budget, &config, event.clone());
        let second = transition(state, budget, &config, event);
        prop_assert_eq!(first, second);
    }
}
