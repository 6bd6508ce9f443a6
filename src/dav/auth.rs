//! Challenge bookkeeping that bounds each request to one credential round.

use std::collections::HashSet;

use crate::transport::RequestHandle;

/// What to do with an authentication challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChallengeDecision {
    /// First challenge for this request: answer with the configured credentials.
    Answer,
    /// Repeat challenge: the credentials were rejected.
    Reject,
}

/// Remembers which in-flight requests were already challenged.
///
/// Tracked per handle rather than as a single "last challenged" slot, so two
/// interleaved requests cannot reset each other's state and loop forever.
#[derive(Debug, Default)]
pub(crate) struct AuthState {
    challenged: HashSet<RequestHandle>,
}

impl AuthState {
    pub(crate) fn on_challenge(&mut self, handle: RequestHandle) -> ChallengeDecision {
        if self.challenged.insert(handle) {
            ChallengeDecision::Answer
        } else {
            ChallengeDecision::Reject
        }
    }

    /// Drops the handle once its request is finished.
    pub(crate) fn forget(&mut self, handle: RequestHandle) {
        self.challenged.remove(&handle);
    }

    #[cfg(test)]
    fn is_tracking(&self, handle: RequestHandle) -> bool {
        self.challenged.contains(&handle)
    }
}
