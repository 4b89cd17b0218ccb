//! # MAL Exchange Benchmarks
//!
//! | Area | Measured |
//! |------|----------|
//! | Matcher | one subscription against a publish batch |
//! | Broker | PUBLISH fan-out as the subscriber count grows |
//! | Registry | open and complete a REQUEST transaction |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mal_broker::{Broker, BrokerConfig, DomainMatching, SubscriptionDetails, UpdateKey};
use mal_interaction::{CallMode, TransactionRegistry};
use mal_types::{
    Domain, Element, EntityKey, EntityRequest, HeaderTemplate, InteractionStage, InteractionType,
    MalMessage, MessageBody, MessageHeader, ServiceKey, Subscription, TransactionId, UpdateBatch,
    UpdateHeader, UpdateType, Uri,
};
use rand::Rng;
use std::time::Duration;

const SERVICE: ServiceKey = ServiceKey::new(200, 1, 1);
const OPERATION: u16 = 10;

fn header(from: &str, stage: InteractionStage, transaction: u64) -> MessageHeader {
    let template = HeaderTemplate::new("inproc://broker", SERVICE, Domain::from_dotted("esa.mission"));
    let mut header = template.header(&Uri::from(from), InteractionType::PubSub, stage, OPERATION);
    header.transaction_id = TransactionId::new(transaction);
    header
}

fn random_batch(size: usize) -> UpdateBatch {
    let mut rng = rand::thread_rng();
    let headers = (0..size)
        .map(|_| {
            let update_type = if rng.gen_bool(0.5) {
                UpdateType::Update
            } else {
                UpdateType::Modification
            };
            let key = EntityKey::concrete(
                format!("param{}", rng.gen_range(0..8)),
                rng.gen_range(0..16),
                0,
                0,
            );
            UpdateHeader::new("inproc://spacecraft", update_type, key)
        })
        .collect();
    let values = (0..size).map(|i| Element::Long(i as i64)).collect();
    UpdateBatch::new(headers, vec![values])
}

fn subscription(id: usize) -> Subscription {
    let key: EntityKey = format!("param{}/*/*/*", id % 8)
        .parse()
        .expect("valid pattern");
    Subscription::new(format!("sub{id}"), vec![EntityRequest::new(vec![key], id % 2 == 0)])
}

// ============================================================================
// MATCHER
// ============================================================================

fn bench_subscription_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher");

    let register = header("inproc://consumer", InteractionStage::REGISTER, 1);
    let publish = header("inproc://provider", InteractionStage::PUBLISH, 2);
    let details = SubscriptionDetails::new(&register, &subscription(0));

    for size in [10, 100, 1000] {
        let batch = random_batch(size);
        let keys: Vec<UpdateKey> = batch
            .headers
            .iter()
            .filter_map(|update| UpdateKey::from_update(&publish, update))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("filter_batch", size), &batch, |b, batch| {
            b.iter(|| black_box(details.filter(&keys, batch, DomainMatching::TrailingWildcard)))
        });
    }

    group.finish();
}

// ============================================================================
// BROKER
// ============================================================================

fn broker_with_subscribers(count: usize, parallel_threshold: usize) -> Broker {
    let broker = Broker::new(BrokerConfig {
        domain_matching: DomainMatching::TrailingWildcard,
        parallel_threshold,
    });
    for id in 0..count {
        let consumer = format!("inproc://consumer-{id}");
        broker.register(&header(&consumer, InteractionStage::REGISTER, id as u64), &subscription(id));
    }
    let publish_register = MalMessage::new(
        header("inproc://provider", InteractionStage::PUBLISH_REGISTER, 0),
        MessageBody::PublishRegister(vec![EntityKey::all_wildcard()]),
    );
    broker
        .handle(&publish_register)
        .expect("publish register accepted");
    broker
}

fn bench_broker_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker");
    group.measurement_time(Duration::from_secs(5));

    let publish_header = header("inproc://provider", InteractionStage::PUBLISH, 0);
    let batch = random_batch(64);

    for subscribers in [1, 16, 128, 1024] {
        for (label, threshold) in [("sequential", usize::MAX), ("parallel", 1)] {
            let broker = broker_with_subscribers(subscribers, threshold);
            group.throughput(Throughput::Elements(subscribers as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("publish_{label}"), subscribers),
                &batch,
                |b, batch| b.iter(|| black_box(broker.publish(&publish_header, batch))),
            );
        }
    }

    group.finish();
}

// ============================================================================
// TRANSACTION REGISTRY
// ============================================================================

fn bench_registry_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let registry = TransactionRegistry::new();
    let template = HeaderTemplate::new("inproc://provider", SERVICE, Domain::from_dotted("esa.mission"));
    let consumer = Uri::from("inproc://consumer");
    let provider = Uri::from("inproc://provider");

    group.bench_function("request_begin_complete", |b| {
        b.iter(|| {
            let (id, receiver) = registry.begin(
                InteractionType::Request,
                InteractionStage::REQUEST,
                provider.clone(),
                CallMode::Blocking,
            );
            let mut request =
                template.header(&consumer, InteractionType::Request, InteractionStage::REQUEST, 1);
            request.transaction_id = id;
            let response = MalMessage::new(
                request.reply(InteractionStage::REQUEST_RESPONSE, false),
                MessageBody::Empty,
            );
            black_box(registry.complete(response));
            black_box(receiver)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_subscription_filter,
    bench_broker_publish,
    bench_registry_round_trip
);
criterion_main!(benches);
