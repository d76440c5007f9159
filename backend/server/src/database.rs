//! # Redis
//!
//! Durable ballot store. Run Redis with AOF (`appendonly yes`, `appendfsync always`)
//! so an acknowledged append survives a crash.
//!
//! ## Layout
//!
//! - `votei:ballots`: list, one JSON ballot per entry, only ever `RPUSH`ed
//! - `votei:voters`: set of identity keys, compound and token keys of every ballot
//!
//! A ballot and its identity keys go in with one `MULTI`/`EXEC`, so the index never
//! names a ballot that is missing from the list or the other way round.
//!
//! ## Rebuild
//!
//! `count_by_candidate` walks the whole list. It only runs once at startup, ballot
//! volume is small and the scan is paged.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{
    AsyncCommands, Client, ConnectionInfo,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, identity::compound_key};

pub const BALLOTS_KEY: &str = "votei:ballots";
pub const VOTERS_KEY: &str = "votei:voters";
const SCAN_PAGE: isize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub network_address: String,
    pub client_signature: String,
    pub client_token: String,
    pub cast_at: DateTime<Utc>,
    pub referrer: String,
    pub locale: String,
    pub client_family: String,
    pub candidate_id: i64,
    pub geo_lat: String,
    pub geo_lon: String,
}

impl Ballot {
    pub fn compound_key(&self) -> String {
        compound_key(&self.network_address, &self.client_signature)
    }
}

/// Append-only ballot storage, no update or delete.
#[async_trait]
pub trait BallotStore: Send + Sync {
    /// True when any ballot is indexed under `key`, as compound key or as client token.
    async fn has_existing_ballot(&self, key: &str) -> Result<bool, StoreError>;

    async fn append_ballot(&self, ballot: &Ballot) -> Result<(), StoreError>;

    async fn count_by_candidate(&self) -> Result<HashMap<i64, u64>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn init_redis(info: ConnectionInfo) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(info)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

#[derive(Clone)]
pub struct RedisBallotStore {
    connection: ConnectionManager,
}

impl RedisBallotStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BallotStore for RedisBallotStore {
    async fn has_existing_ballot(&self, key: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let found: bool = connection.sismember(VOTERS_KEY, key).await?;

        Ok(found)
    }

    async fn append_ballot(&self, ballot: &Ballot) -> Result<(), StoreError> {
        let record = serde_json::to_string(ballot)?;
        let mut connection = self.connection.clone();

        redis::pipe()
            .atomic()
            .rpush(BALLOTS_KEY, record)
            .ignore()
            .sadd(VOTERS_KEY, ballot.compound_key())
            .ignore()
            .sadd(VOTERS_KEY, &ballot.client_token)
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;

        Ok(())
    }

    async fn count_by_candidate(&self) -> Result<HashMap<i64, u64>, StoreError> {
        let mut connection = self.connection.clone();
        let mut counts = HashMap::new();
        let mut start = 0;

        loop {
            let page: Vec<String> = connection
                .lrange(BALLOTS_KEY, start, start + SCAN_PAGE - 1)
                .await?;

            if page.is_empty() {
                break;
            }

            tally_records(&mut counts, &page)?;
            start += page.len() as isize;
        }

        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await?;

        Ok(())
    }
}

/// Adds serialized ballots to `counts`. A record that does not decode aborts the
/// rebuild rather than silently undercounting.
pub fn tally_records(
    counts: &mut HashMap<i64, u64>,
    records: &[String],
) -> Result<(), StoreError> {
    for record in records {
        let ballot: Ballot = serde_json::from_str(record)?;
        *counts.entry(ballot.candidate_id).or_insert(0) += 1;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Inner {
        ballots: Vec<Ballot>,
        voters: HashSet<String>,
    }

    /// Same semantics as the Redis layout, held in memory. Counts every call so
    /// tests can assert which store operations ran.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
        fail_appends: bool,
        pub lookups: AtomicUsize,
        pub appends: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_appends: true,
                ..Self::default()
            }
        }

        pub fn seeded(ballots: impl IntoIterator<Item = Ballot>) -> Self {
            let store = Self::new();
            {
                let mut inner = store.inner.lock();
                for ballot in ballots {
                    inner.voters.insert(ballot.compound_key());
                    inner.voters.insert(ballot.client_token.clone());
                    inner.ballots.push(ballot);
                }
            }
            store
        }

        pub fn ballots(&self) -> Vec<Ballot> {
            self.inner.lock().ballots.clone()
        }

        pub fn calls(&self) -> usize {
            self.lookups.load(Ordering::SeqCst) + self.appends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BallotStore for MemoryStore {
        async fn has_existing_ballot(&self, key: &str) -> Result<bool, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            // widen the check-then-act window for the concurrency tests
            tokio::task::yield_now().await;
            Ok(self.inner.lock().voters.contains(key))
        }

        async fn append_ballot(&self, ballot: &Ballot) -> Result<(), StoreError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self.fail_appends {
                return Err(StoreError::Injected("append_ballot"));
            }

            tokio::task::yield_now().await;
            let mut inner = self.inner.lock();
            inner.voters.insert(ballot.compound_key());
            inner.voters.insert(ballot.client_token.clone());
            inner.ballots.push(ballot.clone());
            Ok(())
        }

        async fn count_by_candidate(&self) -> Result<HashMap<i64, u64>, StoreError> {
            let mut counts = HashMap::new();
            for ballot in &self.inner.lock().ballots {
                *counts.entry(ballot.candidate_id).or_insert(0) += 1;
            }
            Ok(counts)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    pub fn ballot(address: &str, signature: &str, token: &str, candidate_id: i64) -> Ballot {
        Ballot {
            network_address: address.to_string(),
            client_signature: signature.to_string(),
            client_token: token.to_string(),
            cast_at: Utc::now(),
            referrer: String::new(),
            locale: "pt-BR".to_string(),
            client_family: String::new(),
            candidate_id,
            geo_lat: String::new(),
            geo_lon: String::new(),
        }
    }
}
