use std::sync::Arc;

use tracing::info;

use super::{
    admission::AdmissionController,
    config::Config,
    database::{BallotStore, RedisBallotStore, init_redis},
    error::StartupError,
    tally::TallyCache,
};

pub struct State {
    pub config: Config,
    pub tally: Arc<TallyCache>,
    pub admission: AdmissionController,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, StartupError> {
        let redis_connection = init_redis(config.redis.clone()).await?;

        Self::with_store(config, Arc::new(RedisBallotStore::new(redis_connection))).await
    }

    /// Nothing reads the tally or admits a ballot until the rebuild below has finished:
    /// the state only exists once it has.
    pub async fn with_store(
        config: Config,
        store: Arc<dyn BallotStore>,
    ) -> Result<Arc<Self>, StartupError> {
        store.ping().await?;

        let tally = Arc::new(TallyCache::new());
        let counts = store.count_by_candidate().await?;
        info!(
            ballots = counts.values().sum::<u64>(),
            candidates = counts.len(),
            "Rebuilt tally from ballot store"
        );
        tally.rebuild(counts);

        Ok(Arc::new(Self {
            config,
            admission: AdmissionController::new(store, tally.clone()),
            tally,
        }))
    }
}
