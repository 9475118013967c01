use std::sync::Arc;

use anyhow::{Context, Result};
use payloads::SystemClock;
use tracing::info;

use super::{
    config::{Config, StoreKind},
    database::{RedisStore, init_redis},
    memory::MemoryStore,
    service::{ReadingService, ServiceSettings},
    store::{CreditLedger, SessionStore},
    tokens::TokenCodec,
};

pub struct State {
    pub config: Config,
    pub service: ReadingService,
}

impl State {
    pub async fn new() -> Result<Arc<Self>> {
        let config = Config::load()?;

        let sessions: Arc<dyn SessionStore>;
        let ledger: Arc<dyn CreditLedger>;

        match config.store {
            StoreKind::Redis => {
                let connection = init_redis(&config.redis_url)
                    .await
                    .with_context(|| format!("connecting to redis at {}", config.redis_url))?;
                let store = Arc::new(RedisStore::new(connection, config.token_ttl));

                sessions = store.clone();
                ledger = store;
            }
            StoreKind::Memory => {
                info!("Using in-memory store, nothing survives a restart");
                let mut store = MemoryStore::new(Arc::new(SystemClock), config.token_ttl);
                for (article_id, minutes) in &config.seed_articles {
                    store = store.with_article(article_id.clone(), *minutes);
                }
                let store = Arc::new(store);

                sessions = store.clone();
                ledger = store;
            }
        }

        let codec = TokenCodec::new(&config.token_secret).context("invalid token secret")?;

        let service = ReadingService::new(
            sessions,
            ledger,
            codec,
            Arc::new(SystemClock),
            ServiceSettings {
                policy: config.policy,
                token_ttl: config.token_ttl,
                points_per_read: config.points_per_read,
            },
        );

        Ok(Self::from_parts(config, service))
    }

    pub fn from_parts(config: Config, service: ReadingService) -> Arc<Self> {
        Arc::new(Self { config, service })
    }
}
