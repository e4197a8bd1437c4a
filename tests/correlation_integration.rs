use async_trait::async_trait;
use piifilter::correlator::{Correlator, Outcome, QueueResultPublisher, RejectReason};
use piifilter::daemon::MessageConsumer;
use piifilter::error::Result;
use piifilter::facts::{decode_fact, FactKind, FilteredResult, PartialFact, Region};
use piifilter::storage::{MemoryFactStore, PartialFactStore};
use piifilter::transport::{Disposition, MemoryBroker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

const OUTBOUND: &str = "filtered_queue";

struct Harness {
    store: Arc<MemoryFactStore>,
    broker: Arc<MemoryBroker>,
    consumer: MessageConsumer,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryFactStore::new()))
    }

    fn with_store(store: Arc<MemoryFactStore>) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = Arc::new(QueueResultPublisher::new(
            broker.clone(),
            OUTBOUND,
            Duration::from_secs(1),
        ));
        let consumer = MessageConsumer::new(Correlator::new(store.clone(), publisher));
        Self {
            store,
            broker,
            consumer,
        }
    }

    fn published(&self) -> Vec<serde_json::Value> {
        self.broker
            .pending(OUTBOUND)
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }
}

const REGIONS: &[u8] =
    br#"{"img_id":"image_123","bounding_boxes":[{"text":"Hello","left":10,"top":20,"right":100,"bottom":30}]}"#;
const TERMS: &[u8] = br#"{"img_id":"image_123","pii_terms":["Hello"]}"#;

#[tokio::test]
async fn test_regions_then_terms() {
    let harness = Harness::new();

    let first = harness.consumer.process(REGIONS).await;
    assert_eq!(first.disposition, Disposition::Ack);
    assert_eq!(
        first.outcome,
        Some(Outcome::Stored {
            job_id: "image_123".to_string(),
            kind: FactKind::Regions,
        })
    );

    let second = harness.consumer.process(TERMS).await;
    assert_eq!(second.disposition, Disposition::Ack);
    assert_eq!(
        second.outcome,
        Some(Outcome::Completed(FilteredResult {
            job_id: "image_123".to_string(),
            regions: vec![],
        }))
    );

    assert_eq!(
        harness.published(),
        vec![serde_json::json!({"img_id": "image_123", "filtered_boxes": []})]
    );
}

#[tokio::test]
async fn test_arrival_order_does_not_matter() {
    let forward = Harness::new();
    forward.consumer.process(REGIONS).await;
    forward.consumer.process(TERMS).await;

    let reverse = Harness::new();
    reverse.consumer.process(TERMS).await;
    reverse.consumer.process(REGIONS).await;

    assert_eq!(forward.published().len(), 1);
    assert_eq!(forward.published(), reverse.published());
}

#[tokio::test]
async fn test_partial_job_is_not_completed() {
    let harness = Harness::new();

    let processed = harness.consumer.process(TERMS).await;
    assert_eq!(
        processed.outcome,
        Some(Outcome::Stored {
            job_id: "image_123".to_string(),
            kind: FactKind::Terms,
        })
    );
    assert!(harness.published().is_empty());
    assert_eq!(harness.store.keys(), vec!["image_123:pii_terms".to_string()]);
}

#[tokio::test]
async fn test_completed_job_leaves_no_records() {
    let harness = Harness::new();
    harness.consumer.process(TERMS).await;
    harness.consumer.process(REGIONS).await;

    assert!(!harness.store.contains("image_123", FactKind::Regions));
    assert!(!harness.store.contains("image_123", FactKind::Terms));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_jobs_do_not_interfere() {
    let harness = Harness::new();

    harness
        .consumer
        .process(br#"{"img_id":"a","bounding_boxes":[{"text":"Alice Smith","left":0,"top":0,"right":50,"bottom":10},{"text":"invoice","left":60,"top":0,"right":90,"bottom":10}]}"#)
        .await;
    harness
        .consumer
        .process(br#"{"img_id":"b","pii_terms":["invoice"]}"#)
        .await;
    assert!(harness.published().is_empty());

    harness
        .consumer
        .process(br#"{"img_id":"a","pii_terms":["Alice"]}"#)
        .await;

    assert_eq!(
        harness.published(),
        vec![serde_json::json!({
            "img_id": "a",
            "filtered_boxes": [
                {"text": "invoice", "left": 60, "top": 0, "right": 90, "bottom": 10}
            ]
        })]
    );
    assert_eq!(harness.store.keys(), vec!["b:pii_terms".to_string()]);
}

#[tokio::test]
async fn test_later_fact_of_same_kind_replaces_earlier() {
    let harness = Harness::new();

    harness
        .consumer
        .process(br#"{"img_id":"job","pii_terms":["Hello"]}"#)
        .await;
    harness
        .consumer
        .process(br#"{"img_id":"job","pii_terms":["World"]}"#)
        .await;
    harness
        .consumer
        .process(br#"{"img_id":"job","bounding_boxes":[{"text":"Hello","left":0,"top":0,"right":1,"bottom":1},{"text":"World","left":2,"top":0,"right":3,"bottom":1}]}"#)
        .await;

    let published = harness.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["filtered_boxes"][0]["text"], "Hello");
    assert_eq!(published[0]["filtered_boxes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unrecognized_message_acknowledged_without_effects() {
    let harness = Harness::new();

    let processed = harness
        .consumer
        .process(br#"{"img_id":"image_123","unknown_key":"some_value"}"#)
        .await;

    assert_eq!(processed.disposition, Disposition::Ack);
    assert_eq!(processed.outcome, Some(Outcome::Rejected(RejectReason::UnknownKind)));
    assert!(harness.store.is_empty());
    assert!(harness.published().is_empty());
}

#[tokio::test]
async fn test_store_outage_requests_redelivery() {
    let harness = Harness::new();
    harness.store.set_available(false);

    let processed = harness.consumer.process(TERMS).await;
    assert_eq!(processed.disposition, Disposition::redeliver());
    assert_eq!(processed.outcome, None);

    harness.store.set_available(true);
    harness.consumer.process(TERMS).await;
    harness.consumer.process(REGIONS).await;
    assert_eq!(harness.published().len(), 1);
}

#[tokio::test]
async fn test_publish_outage_keeps_job_reconstructable() {
    let harness = Harness::new();
    harness.consumer.process(REGIONS).await;

    harness.broker.set_available(false);
    let processed = harness.consumer.process(TERMS).await;
    assert_eq!(processed.disposition, Disposition::redeliver());
    assert!(harness.store.contains("image_123", FactKind::Regions));
    assert!(harness.store.contains("image_123", FactKind::Terms));

    harness.broker.set_available(true);
    let processed = harness.consumer.process(TERMS).await;
    assert!(matches!(processed.outcome, Some(Outcome::Completed(_))));
    assert_eq!(harness.published().len(), 1);
    assert!(harness.store.is_empty());
}

/// Store whose lookups start together and finish together, so two
/// deliveries both read before either deletes
struct LockstepStore {
    inner: MemoryFactStore,
    barrier: Barrier,
}

#[async_trait]
impl PartialFactStore for LockstepStore {
    async fn put(&self, job_id: &str, kind: FactKind, payload: &str) -> Result<()> {
        self.inner.put(job_id, kind, payload).await
    }

    async fn get(&self, job_id: &str, kind: FactKind) -> Result<Option<String>> {
        // Both puts have landed once the first wait releases
        self.barrier.wait().await;
        let record = self.inner.get(job_id, kind).await;
        self.barrier.wait().await;
        record
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.inner.delete_job(job_id).await
    }
}

#[tokio::test]
async fn test_concurrent_complements_both_complete_identically() {
    let store = Arc::new(LockstepStore {
        inner: MemoryFactStore::new(),
        barrier: Barrier::new(2),
    });
    let broker = Arc::new(MemoryBroker::new());
    let publisher = Arc::new(QueueResultPublisher::new(
        broker.clone(),
        OUTBOUND,
        Duration::from_secs(1),
    ));
    let correlator = Correlator::new(store.clone(), publisher);

    let regions = PartialFact::RegionSet {
        job_id: "job".to_string(),
        regions: vec![
            Region::new("Hello", 10, 20, 100, 30),
            Region::new("World", 110, 20, 190, 30),
        ],
    };
    let terms = PartialFact::TermSet {
        job_id: "job".to_string(),
        terms: vec!["Hello".to_string()],
    };

    // Both facts are stored before either looks up its complement
    let (a, b) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(correlator.on_fact(regions), correlator.on_fact(terms)) },
    )
    .await
    .unwrap();

    let expected = FilteredResult {
        job_id: "job".to_string(),
        regions: vec![Region::new("World", 110, 20, 190, 30)],
    };
    assert_eq!(a.unwrap(), Outcome::Completed(expected.clone()));
    assert_eq!(b.unwrap(), Outcome::Completed(expected));

    let published = broker.pending(OUTBOUND);
    assert_eq!(published.len(), 2);
    assert_eq!(published[0], published[1]);
    assert!(store.inner.is_empty());
}

#[tokio::test]
async fn test_decoded_facts_match_wire_messages() {
    assert_eq!(
        decode_fact(TERMS).unwrap(),
        PartialFact::TermSet {
            job_id: "image_123".to_string(),
            terms: vec!["Hello".to_string()],
        }
    );
}
