//! Integration tests for the sale-to-stock pipeline.
//!
//! Tests: SaleRecorder → sales queue → QueuePoller → sale.created handler →
//! ProductService → products queue
//!
//! Verifies:
//! - Partial failure of a sale leaves the message for redelivery
//! - Redelivery without a ledger decrements again; with one it does not
//! - Product notifications drain from the products queue
//! - Dead-letter cutoff

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;

    use watchstore_core::{EmployeeId, ProductId};
    use watchstore_events::{EventPublisher, InMemoryQueue, QueueClient, ReceiveOptions};
    use watchstore_products::{NewProduct, ProductPatch};
    use watchstore_sales::{NewSale, SaleLineItem};

    use crate::handlers::build_dispatcher;
    use crate::products::ProductService;
    use crate::sales::SaleRecorder;
    use crate::store::{
        InMemoryLineItemLedger, InMemoryProductStore, InMemorySaleStore, LineItemLedger,
    };
    use crate::workers::{DeadLetterPolicy, PollStats, QueuePoller, QueuePollerConfig};

    const PRODUCTS: &str = "watchstore:products";
    const SALES: &str = "watchstore:sales";
    const DLQ: &str = "watchstore:dlq";

    struct Shop {
        queue: Arc<InMemoryQueue>,
        products: ProductService,
        recorder: SaleRecorder,
    }

    /// Undeleted messages become visible again immediately, so every
    /// `run_once` is a redelivery.
    fn shop() -> Shop {
        let queue = Arc::new(InMemoryQueue::with_visibility_timeout(Duration::ZERO));
        let publisher = EventPublisher::new(queue.clone());
        let products = ProductService::new(
            Arc::new(InMemoryProductStore::new()),
            publisher.clone(),
            PRODUCTS,
        );
        let recorder = SaleRecorder::new(Arc::new(InMemorySaleStore::new()), publisher, SALES);
        Shop {
            queue,
            products,
            recorder,
        }
    }

    fn quick() -> ReceiveOptions {
        ReceiveOptions {
            max_messages: 10,
            wait_time: Duration::ZERO,
        }
    }

    fn poller(
        shop: &Shop,
        queue: &str,
        ledger: Option<Arc<dyn LineItemLedger>>,
        dead_letter: Option<DeadLetterPolicy>,
    ) -> QueuePoller {
        let mut config = QueuePollerConfig::new(queue, queue).with_receive_options(quick());
        if let Some(policy) = dead_letter {
            config = config.with_dead_letter(policy);
        }
        QueuePoller::new(
            shop.queue.clone(),
            Arc::new(build_dispatcher(shop.products.clone(), ledger)),
            config,
        )
    }

    async fn product(shop: &Shop, quantity: i64) -> ProductId {
        shop.products
            .create(NewProduct {
                name: format!("Watch with {quantity} in stock"),
                description: None,
                price: 19_900,
                quantity,
            })
            .await
            .unwrap()
            .id
    }

    async fn quantity(shop: &Shop, id: ProductId) -> u32 {
        shop.products.find_one(id).await.unwrap().quantity
    }

    /// `(action, product id)` of everything on the products queue.
    fn product_events(shop: &Shop) -> HashSet<(String, String)> {
        shop.queue
            .bodies(PRODUCTS)
            .iter()
            .map(|b| {
                let v: Value = serde_json::from_str(b).unwrap();
                (
                    v["action"].as_str().unwrap().to_string(),
                    v["payload"]["id"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    /// P1 has 1 in stock and the sale wants 2; P2 has 5 and the sale wants 1.
    async fn partially_failing_sale(shop: &Shop) -> (ProductId, ProductId) {
        let p1 = product(shop, 1).await;
        let p2 = product(shop, 5).await;
        shop.recorder
            .record(
                EmployeeId::new(),
                NewSale {
                    items: vec![
                        SaleLineItem {
                            product_id: p1,
                            quantity: 2,
                        },
                        SaleLineItem {
                            product_id: p2,
                            quantity: 1,
                        },
                    ],
                },
            )
            .await
            .unwrap();
        (p1, p2)
    }

    #[tokio::test]
    async fn partial_failure_notifies_both_products_and_keeps_the_message() {
        let shop = shop();
        let (p1, p2) = partially_failing_sale(&shop).await;

        let stats = poller(&shop, SALES, None, None).run_once().await.unwrap();
        assert_eq!(
            stats,
            PollStats {
                received: 1,
                failed: 1,
                ..PollStats::default()
            }
        );

        assert_eq!(quantity(&shop, p1).await, 1);
        assert_eq!(quantity(&shop, p2).await, 4);
        assert_eq!(shop.queue.len(SALES), 1);

        let expected: HashSet<_> = [
            ("product.low-stock".to_string(), p1.to_string()),
            ("product.updated".to_string(), p2.to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(product_events(&shop), expected);
        assert_eq!(shop.queue.len(PRODUCTS), 2);
    }

    /// Redelivery repeats the lines that already succeeded. This is the
    /// behavior without a ledger, kept visible on purpose.
    #[tokio::test]
    async fn redelivery_without_ledger_decrements_again() {
        let shop = shop();
        let (p1, p2) = partially_failing_sale(&shop).await;
        let poller = poller(&shop, SALES, None, None);

        poller.run_once().await.unwrap();
        poller.run_once().await.unwrap();

        assert_eq!(quantity(&shop, p1).await, 1);
        assert_eq!(quantity(&shop, p2).await, 3);
    }

    #[tokio::test]
    async fn redelivery_with_ledger_applies_each_line_once() {
        let shop = shop();
        let (p1, p2) = partially_failing_sale(&shop).await;
        let ledger: Arc<dyn LineItemLedger> = Arc::new(InMemoryLineItemLedger::new());
        let poller = poller(&shop, SALES, Some(ledger), None);

        assert_eq!(poller.run_once().await.unwrap().failed, 1);
        assert_eq!(poller.run_once().await.unwrap().failed, 1);
        assert_eq!(quantity(&shop, p2).await, 4);

        shop.products
            .update(
                p1,
                ProductPatch {
                    quantity: Some(5),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(poller.run_once().await.unwrap().handled, 1);
        assert!(shop.queue.is_empty(SALES));
        assert_eq!(quantity(&shop, p1).await, 3);
        assert_eq!(quantity(&shop, p2).await, 4);
    }

    #[tokio::test]
    async fn product_notifications_drain_from_products_queue() {
        let shop = shop();
        partially_failing_sale(&shop).await;
        poller(&shop, SALES, None, None).run_once().await.unwrap();

        let stats = poller(&shop, PRODUCTS, None, None).run_once().await.unwrap();
        assert_eq!(stats.handled, 2);
        assert!(shop.queue.is_empty(PRODUCTS));
    }

    #[tokio::test]
    async fn unknown_actions_are_consumed_and_malformed_bodies_are_kept() {
        let shop = shop();
        shop.queue
            .send(SALES, r#"{"action":"sale.refunded","payload":{}}"#.to_string())
            .await
            .unwrap();
        shop.queue
            .send(SALES, r#"{"action":"sale.created","payload":{"saleId":42}}"#.to_string())
            .await
            .unwrap();

        let stats = poller(&shop, SALES, None, None).run_once().await.unwrap();
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(shop.queue.len(SALES), 1);
        assert!(shop.queue.bodies(SALES)[0].contains("\"saleId\":42"));
    }

    #[tokio::test]
    async fn failing_sale_is_dead_lettered_after_cutoff() {
        let shop = shop();
        let (_, p2) = partially_failing_sale(&shop).await;
        let poller = poller(
            &shop,
            SALES,
            None,
            Some(DeadLetterPolicy::new(DLQ).with_max_receive_count(2)),
        );

        poller.run_once().await.unwrap();
        poller.run_once().await.unwrap();
        assert_eq!(poller.run_once().await.unwrap().dead_lettered, 1);

        assert!(shop.queue.is_empty(SALES));
        let dead = shop.queue.bodies(DLQ);
        assert_eq!(dead.len(), 1);
        assert!(dead[0].contains("sale.created"));
        // Two deliveries ran before the cutoff.
        assert_eq!(quantity(&shop, p2).await, 3);
    }
}
