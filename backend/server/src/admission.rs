//! # Admission
//!
//! One ballot per voter identity.
//!
//! ```text
//! validate -> check duplicate -> persist -> update tally
//!     |              |              |
//!  Validation   DuplicateBallot   Store
//! ```
//!
//! Validation runs before the store is touched. The duplicate check, the append and
//! the tally increment run under one process-wide gate, so two requests from the
//! same voter can never both pass the check. Result reads go to the [`TallyCache`]
//! and never wait on the gate.
//!
//! A failed append leaves the tally alone and is returned to the caller as is. No
//! retry: the voter can just submit again.
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    database::{Ballot, BallotStore},
    error::AdmissionError,
    identity::VoterIdentity,
    tally::TallyCache,
    utils::{client_family, parse_candidate},
};

/// Everything a ballot carries besides identity.
#[derive(Debug, Clone, Default)]
pub struct BallotRequest {
    pub candidate_number: String,
    pub referrer: String,
    pub locale: String,
    pub geo_lat: String,
    pub geo_lon: String,
}

pub struct AdmissionController {
    store: Arc<dyn BallotStore>,
    tally: Arc<TallyCache>,
    gate: Mutex<()>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn BallotStore>, tally: Arc<TallyCache>) -> Self {
        Self {
            store,
            tally,
            gate: Mutex::new(()),
        }
    }

    pub async fn admit(
        &self,
        identity: &VoterIdentity,
        request: BallotRequest,
    ) -> Result<Ballot, AdmissionError> {
        let candidate_id = parse_candidate(&request.candidate_number)?;

        let _gate = self.gate.lock().await;

        for key in identity.keys() {
            if self.store.has_existing_ballot(key).await? {
                info!(candidate_id, "Rejected repeat ballot");
                return Err(AdmissionError::DuplicateBallot);
            }
        }

        let ballot = Ballot {
            network_address: identity.network_address.clone(),
            client_signature: identity.client_signature.clone(),
            client_token: identity.token_key.clone(),
            cast_at: Utc::now(),
            referrer: request.referrer,
            locale: request.locale,
            client_family: client_family(&identity.client_signature).to_string(),
            candidate_id,
            geo_lat: request.geo_lat,
            geo_lon: request.geo_lon,
        };

        if let Err(e) = self.store.append_ballot(&ballot).await {
            warn!(candidate_id, error = %e, "Ballot not persisted, tally untouched");
            return Err(e.into());
        }

        self.tally.increment(candidate_id);

        info!(
            candidate_id,
            client_family = %ballot.client_family,
            "Ballot recorded"
        );

        #[cfg(feature = "verbose")]
        info!(?ballot, "Ballot record");

        Ok(ballot)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::atomic::Ordering};

    use super::*;
    use crate::database::testing::{MemoryStore, ballot};

    fn controller(store: Arc<MemoryStore>) -> (AdmissionController, Arc<TallyCache>) {
        let tally = Arc::new(TallyCache::new());
        (AdmissionController::new(store, tally.clone()), tally)
    }

    fn vote(candidate_number: &str) -> BallotRequest {
        BallotRequest {
            candidate_number: candidate_number.to_string(),
            ..BallotRequest::default()
        }
    }

    fn voter(address: &str, token: &str) -> VoterIdentity {
        VoterIdentity::resolve(address, "Mozilla/5.0 Firefox/118.0", Some(token))
    }

    #[tokio::test]
    async fn test_admits_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        let ballot = controller
            .admit(&voter("10.0.0.1", "a"), vote("45"))
            .await
            .unwrap();

        assert_eq!(ballot.candidate_id, 45);
        assert_eq!(ballot.client_family, "Firefox");
        assert_eq!(store.ballots(), vec![ballot]);
        assert_eq!(tally.count(45), 1);
    }

    #[tokio::test]
    async fn test_blank_vote_maps_to_zero() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        let ballot = controller
            .admit(&voter("10.0.0.1", "a"), vote("00"))
            .await
            .unwrap();

        assert_eq!(ballot.candidate_id, 0);
        assert_eq!(store.ballots()[0].candidate_id, 0);
        assert_eq!(tally.count(0), 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_store() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        let err = controller
            .admit(&voter("10.0.0.1", "a"), vote("abc"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::Validation(raw) if raw == "abc"));
        assert_eq!(store.calls(), 0);
        assert!(tally.snapshot_for_read().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_by_compound_key() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        controller
            .admit(&voter("10.0.0.1", "first-token"), vote("45"))
            .await
            .unwrap();
        let err = controller
            .admit(&voter("10.0.0.1", "second-token"), vote("13"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::DuplicateBallot));
        assert_eq!(store.ballots().len(), 1);
        assert_eq!(tally.snapshot_for_read(), HashMap::from([(45, 1)]));
    }

    #[tokio::test]
    async fn test_duplicate_by_token() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        controller
            .admit(&voter("10.0.0.1", "shared"), vote("45"))
            .await
            .unwrap();
        let err = controller
            .admit(&voter("172.16.0.9", "shared"), vote("13"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::DuplicateBallot));
        assert_eq!(store.appends.load(Ordering::SeqCst), 1);
        assert_eq!(tally.count(13), 0);
    }

    #[tokio::test]
    async fn test_different_signature_is_a_different_voter() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());

        controller
            .admit(&voter("10.0.0.1", "a"), vote("45"))
            .await
            .unwrap();
        let other = VoterIdentity::resolve("10.0.0.1", "curl/8.4.0", Some("b"));
        controller.admit(&other, vote("45")).await.unwrap();

        assert_eq!(tally.count(45), 2);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_tally_untouched() {
        let store = Arc::new(MemoryStore::failing());
        let (controller, tally) = controller(store.clone());
        tally.rebuild(HashMap::from([(45, 3)]));

        let err = controller
            .admit(&voter("10.0.0.1", "a"), vote("45"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::Store(_)));
        assert_eq!(tally.snapshot_for_read(), HashMap::from([(45, 3)]));
        assert!(store.ballots().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_voter_already_in_store_after_restart() {
        let store = Arc::new(MemoryStore::seeded([ballot(
            "10.0.0.1",
            "Mozilla/5.0 Firefox/118.0",
            "old-token",
            13,
        )]));
        let (controller, _tally) = controller(store.clone());

        let err = controller
            .admit(&voter("10.0.0.1", "new-token"), vote("45"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::DuplicateBallot));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_attempts_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());
        let controller = Arc::new(controller);

        let attempts: Vec<_> = (0..64)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    // same compound key, distinct tokens
                    let identity = voter("10.0.0.1", &format!("token-{i}"));
                    controller.admit(&identity, vote("45")).await
                })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(AdmissionError::DuplicateBallot) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(store.appends.load(Ordering::SeqCst), 1);
        assert_eq!(tally.count(45), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_tally_matches_store_after_mixed_traffic() {
        let store = Arc::new(MemoryStore::new());
        let (controller, tally) = controller(store.clone());
        let controller = Arc::new(controller);

        let attempts: Vec<_> = (0..200)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    // 50 distinct voters, each trying four times
                    let identity = voter(&format!("10.0.0.{}", i % 50), &format!("t{}", i % 50));
                    let candidate = ["45", "13", "00", "7"][i % 4];
                    let _ = controller.admit(&identity, vote(candidate)).await;
                })
            })
            .collect();

        for attempt in attempts {
            attempt.await.unwrap();
        }

        let counts = store.count_by_candidate().await.unwrap();
        assert_eq!(tally.snapshot_for_read(), counts);
        assert_eq!(counts.values().sum::<u64>(), 50);
    }
}
