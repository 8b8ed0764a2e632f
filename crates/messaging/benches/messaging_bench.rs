use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use messaging::{
    Broker, CircuitBreaker, CircuitBreakerConfig, Envelope, InMemoryBroker, ProducerRecord,
};

fn bench_publish_keyed(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let broker = InMemoryBroker::new(8);

    c.bench_function("broker/publish_keyed", |b| {
        b.iter(|| {
            rt.block_on(async {
                broker
                    .publish(ProducerRecord::new("bench", "{}").with_key("saga-1"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let wire = r#"{"eventType":"PAYMENT_COMPLETED","payload":{"sagaId":"5c2f8a38-8a58-4e4c-9b53-0f4b8c1f4f11","orderId":"0d3c5d9e-1f0a-4d6c-8f5e-2b7a9c3d4e5f","paymentId":"pay-1","amount":10000}}"#;

    c.bench_function("envelope/decode", |b| {
        b.iter(|| Envelope::decode(wire).unwrap());
    });
}

fn bench_breaker_acquire_and_record(c: &mut Criterion) {
    let breaker = Arc::new(CircuitBreaker::new("bench", CircuitBreakerConfig::broker()));

    c.bench_function("circuit_breaker/acquire_and_record", |b| {
        b.iter(|| {
            breaker.try_acquire().unwrap();
            breaker.on_success(Duration::from_millis(1));
        });
    });
}

criterion_group!(
    benches,
    bench_publish_keyed,
    bench_envelope_decode,
    bench_breaker_acquire_and_record
);
criterion_main!(benches);
