//! # Payment State Machine
//!
//! The pure transition function for deferred (mobile-money) payment
//! transactions. The persistence of transitions lives in duka-db; the rules
//! of which transitions exist live here, where they are trivially testable.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   INITIATED ──gateway accepted──► PENDING                               │
//! │       │                              │                                  │
//! │       │ rejected                     ├─ callback success ─► CONFIRMED   │
//! │       ▼                              ├─ callback failure ─► FAILED      │
//! │     FAILED                           └─ sweep timeout ────► EXPIRED     │
//! │                                                                         │
//! │   Terminal states absorb every further event as a NoOp. A duplicate     │
//! │   callback is therefore harmless by construction.                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::types::PaymentState;

// =============================================================================
// Events
// =============================================================================

/// An external event applied to a payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    /// The gateway accepted the STK push request.
    GatewayAccepted,
    /// An authenticated callback reported success.
    CallbackSuccess,
    /// An authenticated callback reported failure, or the initiation was
    /// rejected synchronously.
    CallbackFailure,
    /// The expiry sweep found the transaction stale.
    TimedOut,
}

// =============================================================================
// Transition Result
// =============================================================================

/// The outcome of applying an event to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the new state.
    To(PaymentState),
    /// The event is redundant for this state (duplicate callback on a
    /// terminal transaction). Logged by the caller, never an error.
    NoOp,
}

/// Applies an event to a state.
///
/// Total over all (state, event) pairs; there is no invalid combination,
/// only transitions and no-ops. Events that arrive for a terminal state are
/// no-ops so a replayed callback cannot double-apply anything.
pub fn apply(state: PaymentState, event: PaymentEvent) -> Transition {
    use PaymentEvent::*;
    use PaymentState::*;

    match (state, event) {
        (Initiated, GatewayAccepted) => Transition::To(Pending),
        (Initiated, CallbackFailure) => Transition::To(Failed),
        // A callback can outrun the row update that records gateway
        // acceptance; a success callback on INITIATED is still a success.
        (Initiated, CallbackSuccess) => Transition::To(Confirmed),
        (Initiated, TimedOut) => Transition::To(Expired),

        (Pending, CallbackSuccess) => Transition::To(Confirmed),
        (Pending, CallbackFailure) => Transition::To(Failed),
        (Pending, TimedOut) => Transition::To(Expired),
        (Pending, GatewayAccepted) => Transition::NoOp,

        // Terminal states are immutable.
        (Confirmed, _) | (Failed, _) | (Expired, _) => Transition::NoOp,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentEvent::*;
    use PaymentState::*;

    #[test]
    fn test_happy_path() {
        assert_eq!(apply(Initiated, GatewayAccepted), Transition::To(Pending));
        assert_eq!(apply(Pending, CallbackSuccess), Transition::To(Confirmed));
    }

    #[test]
    fn test_failure_paths() {
        assert_eq!(apply(Initiated, CallbackFailure), Transition::To(Failed));
        assert_eq!(apply(Pending, CallbackFailure), Transition::To(Failed));
        assert_eq!(apply(Pending, TimedOut), Transition::To(Expired));
    }

    #[test]
    fn test_callback_outruns_acceptance() {
        assert_eq!(apply(Initiated, CallbackSuccess), Transition::To(Confirmed));
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        for state in [Confirmed, Failed, Expired] {
            for event in [GatewayAccepted, CallbackSuccess, CallbackFailure, TimedOut] {
                assert_eq!(apply(state, event), Transition::NoOp);
            }
        }
    }

    /// Applying the same success callback twice yields one transition.
    #[test]
    fn test_duplicate_callback_is_noop() {
        let first = apply(Pending, CallbackSuccess);
        assert_eq!(first, Transition::To(Confirmed));
        let second = apply(Confirmed, CallbackSuccess);
        assert_eq!(second, Transition::NoOp);
    }
}
