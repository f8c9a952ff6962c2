use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use lobx_exchange::config::EngineConfig;
use lobx_exchange::coordinator::{Collaborators, EngineCoordinator};
use lobx_exchange::engine::{Order, OrderBookEvent, OrderEvent, OrderStatus, Side};
use lobx_exchange::ledger::MemoryLedger;
use lobx_exchange::market_data::MemoryMarketData;
use lobx_exchange::persist::memory::MemoryOrderStore;
use lobx_exchange::persist::postgres::PostgresOrderStore;
use lobx_exchange::persist::OrderStore;
use lobx_exchange::telemetry;

#[derive(Parser, Debug)]
#[command(name = "lobx", about = "Interactive console for the lobx matching engine")]
struct Args {
    /// Symbol the console trades
    #[arg(long, short)]
    symbol: Option<String>,

    /// Path to a config file (without extension is fine)
    #[arg(long, short)]
    config: Option<String>,

    /// Account id stamped on orders entered here
    #[arg(long, default_value_t = 1)]
    account: u64,
}

struct Console {
    coordinator: EngineCoordinator,
    store: Arc<dyn OrderStore>,
    symbol: String,
    account: u64,
    next_order_id: AtomicU64,
}

impl Console {
    fn order_id(&self) -> u64 {
        self.next_order_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn submit_new(&self, order: Order, market: bool) -> anyhow::Result<()> {
        self.store.insert(&order, OrderStatus::Placed).await?;
        let id = order.id;
        let event = if market { OrderEvent::MarketPlaced { order } } else { OrderEvent::Placed { order } };
        let outcome = self.coordinator.submit(event).await?;
        println!("Submitted order ID {}", id);
        print_outcome(&outcome);
        Ok(())
    }

    // Looks up a resting order so amend/cancel can carry its current snapshot
    async fn resting(&self, id: u64) -> anyhow::Result<Option<Order>> {
        let state = self.coordinator.order_book_state(&self.symbol).await?;
        Ok(state.bids.into_iter().chain(state.asks).find(|o| o.id == id))
    }

    async fn amend(&self, id: u64, price: f64, quantity: f64) -> anyhow::Result<()> {
        let Some(current) = self.resting(id).await? else {
            println!("could not amend: order {} not found", id);
            return Ok(());
        };
        let old_price = current.price.unwrap_or_default();
        let mut order = current.clone();
        order.quantity = quantity;
        let event = if (price - old_price).abs() > f64::EPSILON {
            order.price = Some(price);
            OrderEvent::LimitUpdated { order, old_price }
        } else {
            OrderEvent::QuantityUpdated { order, old_quantity: Some(current.quantity) }
        };
        print_outcome(&self.coordinator.submit(event).await?);
        Ok(())
    }

    async fn cancel(&self, id: u64) -> anyhow::Result<()> {
        let order = match self.resting(id).await? {
            Some(o) => o,
            // Send it anyway so the rejection comes from the book.
            None => Order::limit(id, self.account, &self.symbol, Side::BUY, 0.0, 0.0),
        };
        print_outcome(&self.coordinator.submit(OrderEvent::Canceled { order }).await?);
        Ok(())
    }

    async fn print_book(&self) -> anyhow::Result<()> {
        let state = self.coordinator.order_book_state(&self.symbol).await?;
        println!("\n=== {} ===", state.symbol);
        for o in state.asks.iter().rev() {
            println!("  ASK #{:<6} {:>12.4} x {:<12.4} (filled {:.4})", o.id, o.price.unwrap_or_default(), o.quantity, o.filled_quantity);
        }
        println!("  ----------------------------------------------");
        for o in &state.bids {
            println!("  BID #{:<6} {:>12.4} x {:<12.4} (filled {:.4})", o.id, o.price.unwrap_or_default(), o.quantity, o.filled_quantity);
        }
        println!("========================\n");
        Ok(())
    }

    async fn print_depth(&self) -> anyhow::Result<()> {
        let state = self.coordinator.aggregated_state(&self.symbol).await?;
        println!("\n=== Depth ===");
        for l in state.asks.iter().rev() {
            println!("  ASK {:>12.4}  qty {:<12.4} filled {:.4}", l.price, l.quantity, l.filled_quantity);
        }
        for l in state.bids.iter().rev() {
            println!("  BID {:>12.4}  qty {:<12.4} filled {:.4}", l.price, l.quantity, l.filled_quantity);
        }
        match (state.bids.last(), state.asks.first()) {
            (Some(bid), Some(ask)) => println!("Spread: {}", ask.price - bid.price),
            _ => println!("Spread: N/A"),
        }
        Ok(())
    }
}

fn print_outcome(outcome: &OrderBookEvent) {
    match &outcome.reason {
        Some(reason) => {
            println!("  {:?} order {} ({} {:?} @ {:?}), filled {}", reason.kind, reason.order_id, reason.side.as_str(), reason.quantity, reason.price, reason.filled_quantity);
            for m in &outcome.matches {
                println!("  Fill: maker {} {} @ {}{}", m.maker_order_id, m.quantity, m.price, if m.maker_filled_completely { " (maker done)" } else { "" });
            }
            if outcome.filled_completely {
                println!("  Order filled completely");
            }
        }
        None => match &outcome.rejection {
            Some(e) => println!("  Rejected: {}", e),
            None => println!("  Rejected"),
        },
    }
}

fn parse_pair(parts: &[&str]) -> Option<(f64, f64)> {
    match parts {
        [a, b] => Some((a.parse().ok()?, b.parse().ok()?)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;
    telemetry::init_tracing(&config.log_filter);
    telemetry::init_metrics(config.metrics_port)?;

    let symbol = args.symbol.clone().unwrap_or_else(|| config.symbols.first().cloned().unwrap_or_else(|| "BTC-USD".to_string()));

    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresOrderStore::new(url).await?),
        None => {
            println!("No database configured, using an in-memory order store");
            Arc::new(MemoryOrderStore::new())
        }
    };
    let collaborators = Collaborators::new(store.clone(), Arc::new(MemoryLedger::new()), Arc::new(MemoryMarketData::new(60_000)));
    let coordinator = EngineCoordinator::new(config.clone(), collaborators);
    coordinator.start(&symbol).await?;

    let console = Console {
        coordinator,
        store,
        symbol: symbol.clone(),
        account: args.account,
        next_order_id: AtomicU64::new(lobx_exchange::engine::now_millis()),
    };

    // CLI loop
    loop {
        print!("\nLOBX {}> ", symbol);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some((command, rest)) = parts.split_first() else { continue };

        let result: anyhow::Result<()> = match command.to_lowercase().as_str() {
            "help" | "h" => {
                println!("Available commands:");
                println!("  buy <price> <qty>          - Submit buy limit order");
                println!("  sell <price> <qty>         - Submit sell limit order");
                println!("  market_buy <qty>           - Submit market buy order");
                println!("  market_sell <qty>          - Submit market sell order");
                println!("  amend <id> <price> <qty>   - Change price and/or quantity");
                println!("  cancel <id>                - Cancel a resting order");
                println!("  book                       - Show resting orders");
                println!("  depth                      - Show aggregated levels");
                println!("  recover                    - Rebuild the book from the order store");
                println!("  quit, q                    - Exit");
                Ok(())
            }
            cmd @ ("buy" | "sell") => match parse_pair(rest) {
                Some((price, qty)) => {
                    let side = if cmd == "buy" { Side::BUY } else { Side::SELL };
                    let order = Order::limit(console.order_id(), console.account, &symbol, side, price, qty);
                    console.submit_new(order, false).await
                }
                None => {
                    println!("Usage: {} <price> <qty>", cmd);
                    Ok(())
                }
            },
            cmd @ ("market_buy" | "market_sell") => match rest.first().and_then(|q| q.parse::<f64>().ok()) {
                Some(qty) => {
                    let side = if cmd == "market_buy" { Side::BUY } else { Side::SELL };
                    let order = Order::market(console.order_id(), console.account, &symbol, side, qty);
                    console.submit_new(order, true).await
                }
                None => {
                    println!("Usage: {} <qty>", cmd);
                    Ok(())
                }
            },
            "amend" => match (rest.first().and_then(|s| s.parse::<u64>().ok()), rest.get(1..).and_then(parse_pair)) {
                (Some(id), Some((price, qty))) => console.amend(id, price, qty).await,
                _ => {
                    println!("Usage: amend <id> <price> <qty>");
                    Ok(())
                }
            },
            "cancel" => match rest.first().and_then(|s| s.parse::<u64>().ok()) {
                Some(id) => console.cancel(id).await,
                None => {
                    println!("Usage: cancel <id>");
                    Ok(())
                }
            },
            "book" => console.print_book().await,
            "depth" | "top" => console.print_depth().await,
            "recover" => console.coordinator.recover(&symbol).await.map_err(Into::into),
            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("Error: {:#}", e);
        }
    }

    console.coordinator.shutdown().await;
    Ok(())
}
