//! Queue worker: consumes the products and sales queues until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use watchstore_events::{EventPublisher, QueueClient};
use watchstore_infra::queue::RedisStreamsQueue;
use watchstore_infra::store::{
    self, LineItemLedger, PostgresLineItemLedger, PostgresProductStore,
};
use watchstore_infra::workers::QueuePoller;
use watchstore_infra::{AppConfig, ProductService, build_dispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    watchstore_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = store::postgres::connect(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to postgres")?;
    store::postgres::ensure_schema(&pool)
        .await
        .context("failed to prepare database schema")?;

    let client: Arc<dyn QueueClient> = Arc::new(
        RedisStreamsQueue::new(
            &config.redis_url,
            &config.consumer_group,
            &config.consumer_name,
            config.visibility_timeout,
        )
        .context("invalid redis url")?,
    );
    let publisher = EventPublisher::new(client.clone());

    let products = ProductService::new(
        Arc::new(PostgresProductStore::new(pool.clone())),
        publisher,
        &config.products_queue,
    )
    .with_low_stock_threshold(config.low_stock_threshold);

    let ledger: Option<Arc<dyn LineItemLedger>> = config
        .sale_ledger_enabled
        .then(|| Arc::new(PostgresLineItemLedger::new(pool.clone())) as Arc<dyn LineItemLedger>);
    let dispatcher = Arc::new(build_dispatcher(products, ledger));

    let pollers = [
        ("products", config.products_queue.as_str()),
        ("sales", config.sales_queue.as_str()),
    ]
    .into_iter()
    .map(|(name, queue)| {
        QueuePoller::new(
            client.clone(),
            dispatcher.clone(),
            config.poller_config(name, queue),
        )
        .spawn()
    })
    .collect::<Vec<_>>();

    tracing::info!(
        consumer_group = %config.consumer_group,
        consumer_name = %config.consumer_name,
        sale_ledger = config.sale_ledger_enabled,
        "worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    for poller in pollers {
        poller.shutdown().await;
    }
    pool.close().await;

    tracing::info!("worker stopped");
    Ok(())
}
