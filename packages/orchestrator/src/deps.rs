//! The `Deps` record each subsystem receives explicitly (spec.md §9):
//! store handle, queue factory, clock, logger. Replaces module-level
//! singletons for the pool, the SQS client, and the system clock.

use std::sync::Arc;

use orchestrator_core::Clock;
use sqlx::PgPool;

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::queues::Queues;

/// Everything the scheduler, ingester, downstream generator, and failer
/// need, bundled so tests can substitute fakes for every I/O boundary at
/// once without threading five separate parameters through each function.
#[derive(Clone)]
pub struct Deps {
    pub pool: PgPool,
    pub queues: Arc<Queues>,
    pub catalog: Arc<dyn CatalogStore>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

impl Deps {
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = PgPool::connect(&config.database_url).await?;
        let queues = Arc::new(Queues::from_config(&config).await?);

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let s3_client = aws_sdk_s3::Client::new(&aws_config);
        let catalog: Arc<dyn CatalogStore> =
            Arc::new(crate::catalog::S3CatalogStore::new(s3_client, config.artifact_bucket.clone()));

        Ok(Self {
            pool,
            queues,
            catalog,
            clock: Arc::new(orchestrator_core::SystemClock),
            config: Arc::new(config),
        })
    }
}
