use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{cache::FragmentCache, config::Config, database::Database};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub feed_cache: Arc<Mutex<FragmentCache>>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let database = Database::new(&config.database.url).await?;
        database.init().await?;

        std::fs::create_dir_all(&config.media.root)?;

        let feed_cache = FragmentCache::new(
            config.cache.capacity,
            Duration::from_secs(config.cache.ttl_secs),
        );

        Ok(Self {
            db: Arc::new(database),
            feed_cache: Arc::new(Mutex::new(feed_cache)),
            config,
        })
    }
}
