use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use lobx_exchange::engine::{Order, OrderBook, OrderEvent, Side};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SYM: &str = "BTC-USD";

fn seeded_book(levels: u64, per_level: u64) -> OrderBook {
    let mut book = OrderBook::new(SYM);
    let mut id = 1;
    for level in 0..levels {
        for _ in 0..per_level {
            book.process(OrderEvent::Placed { order: Order::limit(id, id, SYM, Side::SELL, 1_000.0 + level as f64, 1.0) });
            id += 1;
            book.process(OrderEvent::Placed { order: Order::limit(id, id, SYM, Side::BUY, 999.0 - level as f64, 1.0) });
            id += 1;
        }
    }
    book
}

fn bench_matching(c: &mut Criterion) {
    c.bench_function("market_sweep_10_levels", |b| {
        b.iter_batched(
            || seeded_book(20, 10),
            |mut book| {
                let order = Order::market(u64::MAX, 0, SYM, Side::BUY, 100.0);
                black_box(book.process(OrderEvent::MarketPlaced { order }))
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("random_limit_flow", |b| {
        let mut rng = StdRng::seed_from_u64(7);
        let mut book = seeded_book(20, 10);
        let mut id = 1_000_000u64;
        b.iter(|| {
            id += 1;
            let side = if rng.gen_bool(0.5) { Side::BUY } else { Side::SELL };
            let price = 990.0 + rng.gen_range(0..20) as f64;
            let order = Order::limit(id, id, SYM, side, price, rng.gen_range(1..5) as f64);
            black_box(book.process(OrderEvent::Placed { order }))
        })
    });
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
