use std::collections::HashMap;

use lobx_exchange::engine::price_levels::{BestPrice, PriceLevelIndex};
use lobx_exchange::engine::{Order, OrderBook, OrderEvent, OrderId, Side, EPSILON};
use proptest::prelude::*;
use quickcheck::quickcheck;

const SYM: &str = "BTC-USD";

#[derive(Debug, Clone)]
enum Op {
    Limit { side: Side, price: u8, qty: u8 },
    Market { side: Side, qty: u8 },
    Cancel { pick: usize },
    Resize { pick: usize, qty: u8 },
}

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::BUY), Just(Side::SELL)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (side(), 95u8..=105, 1u8..=20).prop_map(|(side, price, qty)| Op::Limit { side, price, qty }),
        1 => (side(), 1u8..=40).prop_map(|(side, qty)| Op::Market { side, qty }),
        1 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
        1 => (any::<usize>(), 1u8..=20).prop_map(|(pick, qty)| Op::Resize { pick, qty }),
    ]
}

fn resting(book: &OrderBook) -> HashMap<OrderId, Order> {
    let state = book.get_order_book_state();
    state.bids.into_iter().chain(state.asks).map(|o| (o.id, o)).collect()
}

fn pick(book: &OrderBook, pick: usize) -> Option<Order> {
    let state = book.get_order_book_state();
    let all: Vec<Order> = state.bids.into_iter().chain(state.asks).collect();
    if all.is_empty() {
        None
    } else {
        Some(all[pick % all.len()].clone())
    }
}

fn to_event(book: &OrderBook, op: &Op, id: OrderId) -> Option<OrderEvent> {
    Some(match op {
        Op::Limit { side, price, qty } => {
            OrderEvent::Placed { order: Order::limit(id, id % 7, SYM, *side, *price as f64, *qty as f64) }
        }
        Op::Market { side, qty } => OrderEvent::MarketPlaced { order: Order::market(id, id % 7, SYM, *side, *qty as f64) },
        Op::Cancel { pick: p } => OrderEvent::Canceled { order: pick(book, *p)? },
        Op::Resize { pick: p, qty } => {
            let mut order = pick(book, *p)?;
            let old_quantity = Some(order.quantity);
            order.quantity = *qty as f64;
            OrderEvent::QuantityUpdated { order, old_quantity }
        }
    })
}

proptest! {
    #[test]
    fn book_never_crosses_and_fills_are_bounded(ops in prop::collection::vec(op(), 1..120)) {
        let mut book = OrderBook::new(SYM);
        for (i, op) in ops.iter().enumerate() {
            let Some(event) = to_event(&book, op, i as OrderId + 1) else { continue };
            let incoming = event.order().clone();
            let before = resting(&book);

            let outcome = book.process(event);

            prop_assert!(!book.is_crossed());
            let traded: f64 = outcome.matches.iter().map(|m| m.quantity).sum();
            prop_assert!(traded <= incoming.remaining() + EPSILON);
            for m in &outcome.matches {
                let maker = &before[&m.maker_order_id];
                prop_assert!(m.quantity <= maker.remaining() + EPSILON);
                prop_assert!(m.maker_filled_quantity >= maker.filled_quantity);
            }

            // Filled quantities never go backwards for orders that stay on the book.
            for (id, after) in resting(&book) {
                if let Some(prev) = before.get(&id) {
                    prop_assert!(after.filled_quantity >= prev.filled_quantity);
                }
                prop_assert!(after.filled_quantity <= after.quantity + EPSILON);
                prop_assert!(after.remaining() > EPSILON);
            }
        }
    }

    #[test]
    fn only_level_heads_are_partially_filled(
        orders in prop::collection::vec((side(), 98u8..=102, 1u8..=10, prop::bool::weighted(0.15)), 1..150)
    ) {
        let mut book = OrderBook::new(SYM);
        for (i, (side, price, qty, market)) in orders.into_iter().enumerate() {
            let id = i as OrderId + 1;
            let event = if market {
                OrderEvent::MarketPlaced { order: Order::market(id, 1, SYM, side, qty as f64) }
            } else {
                OrderEvent::Placed { order: Order::limit(id, 1, SYM, side, price as f64, qty as f64) }
            };
            book.process(event);

            let state = book.get_order_book_state();
            for orders in [state.bids, state.asks] {
                let mut last_price = None;
                for order in orders {
                    let head = last_price != order.price;
                    if !head {
                        prop_assert_eq!(order.filled_quantity, 0.0);
                    }
                    last_price = order.price;
                }
            }
        }
    }
}

#[test]
fn market_buy_sweeps_and_discards_remainder() {
    let mut book = OrderBook::new(SYM);
    book.process(OrderEvent::Placed { order: Order::limit(1, 1, SYM, Side::SELL, 101.0, 10.0) });
    book.process(OrderEvent::Placed { order: Order::limit(2, 1, SYM, Side::SELL, 100.0, 5.0) });

    let outcome = book.process(OrderEvent::MarketPlaced { order: Order::market(3, 2, SYM, Side::BUY, 200.0) });

    let fills: Vec<(f64, f64)> = outcome.matches.iter().map(|m| (m.price, m.quantity)).collect();
    assert_eq!(fills, vec![(100.0, 5.0), (101.0, 10.0)]);
    assert!(!outcome.filled_completely);
    assert_eq!(book.resting_counts(), (0, 0));
}

fn level_invariant_holds(ops: Vec<(bool, u8, u8)>) -> bool {
    let mut index = PriceLevelIndex::new(BestPrice::Lowest);
    let mut live: HashMap<OrderId, u8> = HashMap::new();
    for (add, key, price) in ops {
        let id = key as OrderId % 32;
        let price = price % 8;
        if add {
            let ok = index.add_order(Order::limit(id, 1, SYM, Side::SELL, price as f64, 1.0)).is_ok();
            if ok != !live.contains_key(&id) {
                return false;
            }
            live.entry(id).or_insert(price);
        } else {
            let ok = index.remove_order(id).is_ok();
            if ok != live.remove(&id).is_some() {
                return false;
            }
        }
    }
    let mut prices: Vec<u8> = live.values().copied().collect();
    prices.sort_unstable();
    prices.dedup();
    let levels = index.aggregate();
    index.len() == live.len()
        && levels.len() == prices.len()
        && levels.iter().all(|l| l.quantity > 0.0)
        && index.best_price() == prices.first().map(|p| *p as f64)
}

quickcheck! {
    fn levels_exist_iff_non_empty(ops: Vec<(bool, u8, u8)>) -> bool {
        level_invariant_holds(ops)
    }
}
