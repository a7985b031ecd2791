use serde::{Deserialize, Serialize};

/// Authoritative disposition of one request, set exactly once when its
/// trace is finalized. This is the single place the decision/status
/// separation (policy verdict vs. technical HTTP status) is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allowed,
    Warned,
    DeniedAuth,
    DeniedFeature,
    DeniedPolicy,
    DeniedBudget,
    DeniedAbuse,
    DeniedContent,
    Error,
}

/// Policy verdict persisted alongside a trace: the business-facing
/// decision, independent of whatever technical status accompanies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
}

/// Technical status of trace execution: did the pipeline complete without
/// throwing, independent of whether the request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Map a finalized outcome to its `(decision, status)` pair.
///
/// `denied_*` outcomes are correct admission decisions, not failures, but
/// they are still recorded with `status = Error` because the request did
/// not complete successfully from the caller's point of view. Only
/// `Allowed`/`Warned` carry `status = Success`. This mapping must never be
/// special-cased per call site — every `fail_trace`/`complete_trace` caller
/// goes through this function so decision and status cannot drift apart.
#[must_use]
pub fn decision_and_status(outcome: Outcome) -> (Decision, Status) {
    match outcome {
        Outcome::Allowed | Outcome::Warned => (Decision::Allow, Status::Success),
        Outcome::DeniedAuth
        | Outcome::DeniedFeature
        | Outcome::DeniedPolicy
        | Outcome::DeniedBudget
        | Outcome::DeniedAbuse
        | Outcome::DeniedContent => (Decision::Block, Status::Error),
        Outcome::Error => (Decision::Block, Status::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_and_warned_are_success() {
        assert_eq!(
            decision_and_status(Outcome::Allowed),
            (Decision::Allow, Status::Success)
        );
        assert_eq!(
            decision_and_status(Outcome::Warned),
            (Decision::Allow, Status::Success)
        );
    }

    #[test]
    fn every_denial_blocks_and_is_technically_an_error() {
        for outcome in [
            Outcome::DeniedAuth,
            Outcome::DeniedFeature,
            Outcome::DeniedPolicy,
            Outcome::DeniedBudget,
            Outcome::DeniedAbuse,
            Outcome::DeniedContent,
        ] {
            assert_eq!(
                decision_and_status(outcome),
                (Decision::Block, Status::Error),
                "{outcome:?} must block with error status"
            );
        }
    }

    #[test]
    fn raw_error_blocks_too() {
        assert_eq!(
            decision_and_status(Outcome::Error),
            (Decision::Block, Status::Error)
        );
    }
}
