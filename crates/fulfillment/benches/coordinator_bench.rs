use channel::{EventProducer, InMemoryBroker};
use common::{Money, ProductId, RequestContext, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use fulfillment::{LineItem, OrderCoordinator, OrderRequest};
use ledger::{CatalogStore, InMemoryCatalog, InMemoryOrderLedger, NewProduct};

type BenchCoordinator = OrderCoordinator<InMemoryCatalog, InMemoryOrderLedger, InMemoryBroker>;

async fn seeded(products: usize) -> (BenchCoordinator, Vec<ProductId>) {
    let catalog = InMemoryCatalog::new();
    let mut ids = Vec::with_capacity(products);
    for i in 0..products {
        let product = catalog
            .create_product(NewProduct {
                name: format!("Product {i}"),
                description: String::new(),
                unit_price: Money::from_cents(1000),
                stock: u32::MAX,
            })
            .await
            .unwrap();
        ids.push(product.id);
    }
    let coordinator = OrderCoordinator::new(
        catalog,
        InMemoryOrderLedger::new(),
        EventProducer::new(InMemoryBroker::default()),
    );
    (coordinator, ids)
}

fn request(ids: &[ProductId]) -> OrderRequest {
    OrderRequest {
        user_id: UserId::new(1),
        items: ids
            .iter()
            .map(|&product_id| LineItem {
                product_id,
                quantity: 1,
                price: Money::from_cents(1000),
            })
            .collect(),
    }
}

fn bench_create_order_single_line(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (coordinator, ids) = rt.block_on(seeded(1));
    c.bench_function("coordinator/create_order_single_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator.create_order(&RequestContext::new(), request(&ids)).await.unwrap();
            });
        });
    });
}

fn bench_create_order_ten_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (coordinator, ids) = rt.block_on(seeded(10));
    c.bench_function("coordinator/create_order_ten_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator.create_order(&RequestContext::new(), request(&ids)).await.unwrap();
            });
        });
    });
}

fn bench_rejected_order_with_compensation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (coordinator, ids) = rt.block_on(seeded(3));
    coordinator.catalog().fail_decrement_for(ids[2]);
    c.bench_function("coordinator/rejected_order_with_compensation", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = coordinator.create_order(&RequestContext::new(), request(&ids)).await;
            });
        });
    });
}

criterion_group!(
    benches,
    bench_create_order_single_line,
    bench_create_order_ten_lines,
    bench_rejected_order_with_compensation
);
criterion_main!(benches);
