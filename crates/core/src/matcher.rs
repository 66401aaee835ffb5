//! Candidate selection over the waiting pool
//!
//! Selection is a pure function; the registry calls it while holding its
//! lock and then commits the pairing in the same critical section.

use crate::config::{InitiatorRole, MatchmakingConfig};
use crate::endpoint::EndpointId;
use crate::pool::WaitingPool;

/// Eligibility rules applied to each waiting endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Require both sides to be in the same lobby
    pub enforce_lobby: bool,
    pub initiator_role: InitiatorRole,
}

impl From<&MatchmakingConfig> for MatchPolicy {
    fn from(config: &MatchmakingConfig) -> Self {
        Self {
            enforce_lobby: config.enforce_lobby,
            initiator_role: config.initiator_role,
        }
    }
}

impl MatchPolicy {
    /// Whether the endpoint that called find-partner builds the first offer
    pub fn caller_is_initiator(&self) -> bool {
        self.initiator_role == InitiatorRole::Caller
    }
}

/// What the matcher needs to know about a waiting endpoint
#[derive(Debug, Clone, Copy)]
pub struct CandidateView<'a> {
    pub has_partner: bool,
    pub lobby: Option<&'a str>,
}

/// Pick the first eligible candidate in arrival order
///
/// A candidate is eligible when it is not the caller, has no partner and,
/// with lobby enforcement on, shares the caller's lobby. Ids the lookup
/// cannot resolve are skipped.
pub fn select_candidate<'a, F>(
    pool: &WaitingPool,
    caller: &EndpointId,
    caller_lobby: Option<&str>,
    policy: MatchPolicy,
    lookup: F,
) -> Option<EndpointId>
where
    F: Fn(&EndpointId) -> Option<CandidateView<'a>>,
{
    pool.iter()
        .filter(|id| *id != caller)
        .find(|id| match lookup(*id) {
            Some(view) => {
                !view.has_partner && (!policy.enforce_lobby || view.lobby == caller_lobby)
            }
            None => false,
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn policy(enforce_lobby: bool) -> MatchPolicy {
        MatchPolicy {
            enforce_lobby,
            initiator_role: InitiatorRole::Caller,
        }
    }

    fn pool_of(ids: &[&str]) -> WaitingPool {
        let mut pool = WaitingPool::new();
        for id in ids {
            pool.insert(EndpointId::from(*id));
        }
        pool
    }

    #[test]
    fn test_first_eligible_wins() {
        let pool = pool_of(&["a", "b", "c"]);
        let views: HashMap<&str, (bool, Option<&str>)> =
            [("a", (true, None)), ("b", (false, None)), ("c", (false, None))]
                .into_iter()
                .collect();

        let chosen = select_candidate(&pool, &EndpointId::from("z"), None, policy(true), |id| {
            views.get(id.as_str()).map(|(has_partner, lobby)| CandidateView {
                has_partner: *has_partner,
                lobby: *lobby,
            })
        });
        assert_eq!(chosen, Some(EndpointId::from("b")));
    }

    #[test]
    fn test_never_selects_caller() {
        let pool = pool_of(&["a"]);
        let chosen = select_candidate(&pool, &EndpointId::from("a"), None, policy(true), |_| {
            Some(CandidateView {
                has_partner: false,
                lobby: None,
            })
        });
        assert!(chosen.is_none());
    }

    #[test]
    fn test_lobby_enforcement() {
        let pool = pool_of(&["gamer", "musician"]);
        let lobbies: HashMap<&str, &str> =
            [("gamer", "gaming"), ("musician", "music")].into_iter().collect();
        let lookup = |id: &EndpointId| {
            Some(CandidateView {
                has_partner: false,
                lobby: lobbies.get(id.as_str()).copied(),
            })
        };

        let caller = EndpointId::from("z");
        assert_eq!(
            select_candidate(&pool, &caller, Some("music"), policy(true), lookup),
            Some(EndpointId::from("musician"))
        );
        assert_eq!(
            select_candidate(&pool, &caller, Some("music"), policy(false), lookup),
            Some(EndpointId::from("gamer"))
        );
        assert_eq!(
            select_candidate(&pool, &caller, Some("art"), policy(true), lookup),
            None
        );
    }

    #[test]
    fn test_initiator_role() {
        assert!(policy(true).caller_is_initiator());
        let waiter = MatchPolicy {
            enforce_lobby: true,
            initiator_role: InitiatorRole::Waiter,
        };
        assert!(!waiter.caller_is_initiator());
    }
}
