//! Price-indexed storage for one side of a book.
//!
//! Levels are kept in a `BTreeMap` keyed by price so the best level is found in
//! O(log n). Orders within a level form an intrusive FIFO list whose nodes live
//! in an arena; each resting order is reachable through a stable slot handle, so
//! unlinking an order never scans its level.

use std::collections::BTreeMap;

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use tracing::{debug, error, trace};

use crate::engine::types::{BookError, LevelState, Order, OrderId};

type Price = OrderedFloat<f64>;

/// Stable position of a resting order inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestPrice {
    Lowest,
    Highest,
}

#[derive(Debug)]
struct Node {
    order: Order,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Level {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

#[derive(Debug)]
pub struct PriceLevelIndex {
    best: BestPrice,
    levels: BTreeMap<Price, Level>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    handles: AHashMap<OrderId, Handle>,
}

impl PriceLevelIndex {
    pub fn new(best: BestPrice) -> Self {
        PriceLevelIndex {
            best,
            levels: BTreeMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            handles: AHashMap::new(),
        }
    }

    /// Appends `order` to the tail of its price level, creating the level if needed.
    pub fn add_order(&mut self, order: Order) -> Result<Handle, BookError> {
        if self.handles.contains_key(&order.id) {
            return Err(BookError::DuplicateOrder { id: order.id });
        }
        let price = match order.price {
            Some(p) => OrderedFloat(p),
            None => return Err(BookError::UnsupportedOrderType(order.order_type.as_str().to_string())),
        };

        let id = order.id;
        let slot = self.alloc(Node { order, prev: None, next: None });
        let level = self.levels.entry(price).or_default();
        match level.tail {
            Some(tail) => {
                if let Some(node) = self.slots[tail].as_mut() {
                    node.next = Some(slot);
                }
                if let Some(node) = self.slots[slot].as_mut() {
                    node.prev = Some(tail);
                }
            }
            None => level.head = Some(slot),
        }
        level.tail = Some(slot);
        level.len += 1;

        let handle = Handle(slot);
        self.handles.insert(id, handle);
        trace!(id = id, price = price.0, slot = slot, "Linked order into level");
        Ok(handle)
    }

    /// Unlinks the order from its level and hands it back. Drops the level when it empties.
    pub fn remove_order(&mut self, id: OrderId) -> Result<Order, BookError> {
        let Handle(slot) = self.handles.remove(&id).ok_or(BookError::OrderNotFound { id })?;
        let node = match self.slots.get_mut(slot).and_then(Option::take) {
            Some(node) => node,
            None => {
                error!(id = id, slot = slot, "Handle points at an empty slot");
                return Err(BookError::OrderNotFound { id });
            }
        };
        self.free.push(slot);

        if let Some(prev) = node.prev {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = node.next;
            }
        }
        if let Some(next) = node.next {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = node.prev;
            }
        }

        // Only limit orders are ever linked, so the price is always present.
        let price = OrderedFloat(node.order.price.unwrap_or_default());
        let now_empty = match self.levels.get_mut(&price) {
            Some(level) => {
                if level.head == Some(slot) {
                    level.head = node.next;
                }
                if level.tail == Some(slot) {
                    level.tail = node.prev;
                }
                level.len -= 1;
                level.len == 0
            }
            None => {
                error!(id = id, price = price.0, "Order linked to a missing level");
                false
            }
        };
        if now_empty {
            self.levels.remove(&price);
            debug!(price = price.0, "Removed empty price level");
        }
        Ok(node.order)
    }

    pub fn best_price(&self) -> Option<f64> {
        let key = match self.best {
            BestPrice::Lowest => self.levels.keys().next(),
            BestPrice::Highest => self.levels.keys().next_back(),
        };
        key.map(|p| p.0)
    }

    /// Oldest order at `price`.
    pub fn first_order_at(&self, price: f64) -> Option<&Order> {
        let head = self.levels.get(&OrderedFloat(price))?.head?;
        self.slots[head].as_ref().map(|n| &n.order)
    }

    pub(crate) fn first_order_at_mut(&mut self, price: f64) -> Option<&mut Order> {
        let head = self.levels.get(&OrderedFloat(price))?.head?;
        self.slots[head].as_mut().map(|n| &mut n.order)
    }

    /// Changes the nominal quantity in place; the order keeps its queue position.
    pub fn update_quantity(&mut self, id: OrderId, quantity: f64) -> Result<(), BookError> {
        let order = self.get_mut(id).ok_or(BookError::OrderNotFound { id })?;
        order.quantity = quantity;
        Ok(())
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        let Handle(slot) = *self.handles.get(&id)?;
        self.slots[slot].as_ref().map(|n| &n.order)
    }

    fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        let Handle(slot) = *self.handles.get(&id)?;
        self.slots[slot].as_mut().map(|n| &mut n.order)
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Orders at `price` in time priority.
    pub fn orders_at(&self, price: f64) -> LevelIter<'_> {
        let cursor = self.levels.get(&OrderedFloat(price)).and_then(|l| l.head);
        LevelIter { slots: &self.slots, cursor }
    }

    /// Occupied prices, best first.
    pub fn prices(&self) -> Vec<f64> {
        let keys = self.levels.keys().map(|p| p.0);
        match self.best {
            BestPrice::Lowest => keys.collect(),
            BestPrice::Highest => keys.rev().collect(),
        }
    }

    /// One entry per occupied level, ascending by price.
    pub fn aggregate(&self) -> Vec<LevelState> {
        self.levels
            .keys()
            .map(|price| {
                let (quantity, filled_quantity) = self
                    .orders_at(price.0)
                    .fold((0.0, 0.0), |(q, f), o| (q + o.quantity, f + o.filled_quantity));
                LevelState { price: price.0, quantity, filled_quantity }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }
}

pub struct LevelIter<'a> {
    slots: &'a [Option<Node>],
    cursor: Option<usize>,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = &'a Order;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.slots.get(self.cursor?)?.as_ref()?;
        self.cursor = node.next;
        Some(&node.order)
    }
}
