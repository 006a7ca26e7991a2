use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BrokerError;
use crate::execution::orders::Order;
use crate::models::Bot;

/// A realized position slice.
///
/// Orders reference their trade through `trade_id`; the trade keeps only a
/// weak back-reference to its constituent order ids and does not own their
/// lifecycle. Open trades have no exit fields; partial closes split off a
/// closed slice and shrink the remaining open trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub order_ids: Vec<u64>,
}

impl Trade {
    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.size < 0.0
    }

    pub fn is_closed(&self) -> bool {
        self.exit_price.is_some()
    }

    /// Realized PnL; None while the trade is open
    pub fn pnl(&self) -> Option<f64> {
        self.exit_price
            .map(|exit| (exit - self.entry_price) * self.size)
    }

    /// Realized PnL as a fraction of entry notional
    pub fn pnl_pct(&self) -> Option<f64> {
        self.pnl()
            .map(|pnl| pnl / (self.entry_price * self.size.abs()))
    }

    /// Mark-to-market PnL at the given price
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size
    }
}

/// One point of the equity curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
}

/// Result of pushing one fill through the broker
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// Trade the fill opened or extended; None if it only closed exposure
    pub trade_id: Option<u64>,
    /// Trades fully closed by this fill
    pub closed_trades: Vec<u64>,
    pub realized_pnl: f64,
}

/// Result of one mark-to-market pass
#[derive(Debug, Clone, Copy)]
pub struct MarkOutcome {
    pub equity: f64,
    /// True exactly once, on the mark that crossed into liquidation
    pub liquidated_now: bool,
}

/// Aggregate statistics over closed trades, as served for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub loss_making_trades: usize,
    pub total_pnl: f64,
    pub avg_pnl_per_trade: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl TradeStats {
    pub fn from_trades(closed: &[Trade]) -> Self {
        let pnls: Vec<f64> = closed.iter().filter_map(|t| t.pnl()).collect();
        let total_pnl: f64 = pnls.iter().sum();

        let (best_trade, worst_trade) = if pnls.is_empty() {
            (0.0, 0.0)
        } else {
            (
                pnls.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                pnls.iter().cloned().fold(f64::INFINITY, f64::min),
            )
        };

        Self {
            total_trades: pnls.len(),
            profitable_trades: pnls.iter().filter(|p| **p > 0.0).count(),
            loss_making_trades: pnls.iter().filter(|p| **p < 0.0).count(),
            total_pnl,
            avg_pnl_per_trade: if pnls.is_empty() {
                0.0
            } else {
                total_pnl / pnls.len() as f64
            },
            best_trade,
            worst_trade,
        }
    }
}

/// Immutable reporting view of the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub cash: f64,
    pub last_price: f64,
    pub equity: f64,
    pub commission_paid: f64,
    pub liquidated: bool,
    pub equity_curve: Vec<EquityPoint>,
    pub open_orders: Vec<Order>,
    pub open_trades: Vec<Trade>,
    pub closed_trades: Vec<Trade>,
    pub stats: TradeStats,
}

/// In-memory ledger of cash, trades and the equity curve - the single
/// source of truth for position and PnL.
///
/// All mutation funnels through `apply_fill` and `mark_to_market`; the live
/// engine and the backtester drive the same two entry points, which is what
/// keeps their accounting identical.
pub struct BrokerState {
    cash: f64,
    initial_cash: f64,
    commission: f64,
    hedge_mode: bool,
    last_price: f64,
    commission_paid: f64,
    equity_curve: Vec<EquityPoint>,
    open: BTreeMap<u64, Trade>,
    closed: Vec<Trade>,
    next_trade_id: u64,
    liquidated: bool,
}

impl BrokerState {
    pub fn new(initial_cash: f64, commission: f64, hedge_mode: bool) -> Self {
        Self {
            cash: initial_cash,
            initial_cash,
            commission,
            hedge_mode,
            last_price: 0.0,
            commission_paid: 0.0,
            equity_curve: Vec::new(),
            open: BTreeMap::new(),
            closed: Vec::new(),
            next_trade_id: 1,
            liquidated: false,
        }
    }

    pub fn for_bot(bot: &Bot) -> Self {
        Self::new(bot.cash, bot.commission, bot.hedge_mode)
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    pub fn commission_paid(&self) -> f64 {
        self.commission_paid
    }

    pub fn commission_rate(&self) -> f64 {
        self.commission
    }

    pub fn is_liquidated(&self) -> bool {
        self.liquidated
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn open_trades(&self) -> Vec<&Trade> {
        self.open.values().collect()
    }

    pub fn open_trade(&self, id: u64) -> Option<&Trade> {
        self.open.get(&id)
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed
    }

    /// Net open exposure (sum of signed open trade sizes)
    pub fn net_position(&self) -> f64 {
        self.open.values().map(|t| t.size).sum()
    }

    /// Mark-to-market equity at the given price
    pub fn equity_at(&self, price: f64) -> f64 {
        self.cash + self.open.values().map(|t| t.size * price).sum::<f64>()
    }

    fn allocate_trade_id(&mut self) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        id
    }

    /// Apply a fill: mutate cash by notional and commission, then create,
    /// extend or close trades. Returns the affected trade.
    ///
    /// Closing orders (those carrying a `trade_id`) close at most the
    /// remaining size of their trade. Entry orders reduce opposing exposure
    /// first when hedge mode is off; in hedge mode long and short trades
    /// coexist.
    pub fn apply_fill(
        &mut self,
        order: &Order,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<FillOutcome, BrokerError> {
        if self.liquidated {
            return Err(BrokerError::Liquidated);
        }

        let fee = self.commission * order.size.abs() * price;
        self.cash -= fee;
        self.commission_paid += fee;
        self.last_price = price;

        if let Some(trade_id) = order.trade_id {
            self.close_against_trade(trade_id, order, price, time)
        } else {
            self.fill_entry(order, price, time)
        }
    }

    fn close_against_trade(
        &mut self,
        trade_id: u64,
        order: &Order,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<FillOutcome, BrokerError> {
        let trade = self
            .open
            .get_mut(&trade_id)
            .ok_or(BrokerError::UnknownTrade(trade_id))?;

        let close_size = order.size.abs().min(trade.size.abs()) * trade.size.signum();
        if order.size.abs() > trade.size.abs() {
            tracing::warn!(
                order_id = order.id,
                trade_id,
                "closing order larger than remaining trade, residual dropped"
            );
        }

        self.cash += close_size * price;
        let realized = (price - trade.entry_price) * close_size;

        let fully_closed = close_size == trade.size;
        if fully_closed {
            trade.exit_price = Some(price);
            trade.exit_time = Some(time);
            trade.order_ids.push(order.id);
            let done = self.open.remove(&trade_id).expect("trade exists");
            self.closed.push(done);

            Ok(FillOutcome {
                trade_id: Some(trade_id),
                closed_trades: vec![trade_id],
                realized_pnl: realized,
            })
        } else {
            let slice_orders = {
                let mut ids = trade.order_ids.clone();
                ids.push(order.id);
                ids
            };
            let entry_price = trade.entry_price;
            let entry_time = trade.entry_time;
            trade.size -= close_size;

            let slice_id = self.allocate_trade_id();
            self.closed.push(Trade {
                id: slice_id,
                size: close_size,
                entry_price,
                entry_time,
                exit_price: Some(price),
                exit_time: Some(time),
                order_ids: slice_orders,
            });

            Ok(FillOutcome {
                trade_id: Some(trade_id),
                closed_trades: Vec::new(),
                realized_pnl: realized,
            })
        }
    }

    fn fill_entry(
        &mut self,
        order: &Order,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<FillOutcome, BrokerError> {
        let mut remaining = order.size;
        let mut closed_ids = Vec::new();
        let mut realized = 0.0;

        // Hedge mode off: an opposing fill reduces existing exposure first,
        // oldest trade first.
        if !self.hedge_mode {
            let opposing: Vec<u64> = self
                .open
                .iter()
                .filter(|(_, t)| t.size.signum() == -remaining.signum())
                .map(|(id, _)| *id)
                .collect();

            for tid in opposing {
                if remaining.abs() < 1e-12 {
                    break;
                }
                let trade = self.open.get_mut(&tid).expect("trade exists");
                let close_size = remaining.abs().min(trade.size.abs()) * trade.size.signum();

                self.cash += close_size * price;
                realized += (price - trade.entry_price) * close_size;
                remaining += close_size;

                if close_size == trade.size {
                    trade.exit_price = Some(price);
                    trade.exit_time = Some(time);
                    trade.order_ids.push(order.id);
                    let done = self.open.remove(&tid).expect("trade exists");
                    self.closed.push(done);
                    closed_ids.push(tid);
                } else {
                    let slice_orders = {
                        let mut ids = trade.order_ids.clone();
                        ids.push(order.id);
                        ids
                    };
                    let entry_price = trade.entry_price;
                    let entry_time = trade.entry_time;
                    trade.size -= close_size;

                    let slice_id = self.allocate_trade_id();
                    self.closed.push(Trade {
                        id: slice_id,
                        size: close_size,
                        entry_price,
                        entry_time,
                        exit_price: Some(price),
                        exit_time: Some(time),
                        order_ids: slice_orders,
                    });
                }
            }
        }

        if remaining.abs() < 1e-12 {
            return Ok(FillOutcome {
                trade_id: None,
                closed_trades: closed_ids,
                realized_pnl: realized,
            });
        }

        // Extend an existing same-direction trade at the weighted-mean
        // entry price, or open a new one.
        self.cash -= remaining * price;

        let same_direction = self
            .open
            .iter()
            .find(|(_, t)| t.size.signum() == remaining.signum())
            .map(|(id, _)| *id);

        let trade_id = match same_direction {
            Some(tid) => {
                let trade = self.open.get_mut(&tid).expect("trade exists");
                let new_size = trade.size + remaining;
                trade.entry_price =
                    (trade.entry_price * trade.size + price * remaining) / new_size;
                trade.size = new_size;
                trade.order_ids.push(order.id);
                tid
            }
            None => {
                let tid = self.allocate_trade_id();
                self.open.insert(
                    tid,
                    Trade {
                        id: tid,
                        size: remaining,
                        entry_price: price,
                        entry_time: time,
                        exit_price: None,
                        exit_time: None,
                        order_ids: vec![order.id],
                    },
                );
                tid
            }
        };

        Ok(FillOutcome {
            trade_id: Some(trade_id),
            closed_trades: closed_ids,
            realized_pnl: realized,
        })
    }

    /// Recompute mark-to-market equity at `price` and append an equity
    /// snapshot. Crossing to equity <= 0 triggers the terminal liquidation
    /// transition: every open trade is settled at `price` and the broker
    /// refuses further fills.
    pub fn mark_to_market(&mut self, price: f64, time: DateTime<Utc>) -> MarkOutcome {
        if self.liquidated {
            return MarkOutcome {
                equity: self.cash,
                liquidated_now: false,
            };
        }

        self.last_price = price;
        let equity = self.equity_at(price);
        self.equity_curve.push(EquityPoint {
            timestamp: time,
            equity,
            cash: self.cash,
        });

        if equity > 0.0 {
            return MarkOutcome {
                equity,
                liquidated_now: false,
            };
        }

        tracing::warn!(equity, price, "equity exhausted, liquidating");
        let open_ids: Vec<u64> = self.open.keys().copied().collect();
        for tid in open_ids {
            let mut trade = self.open.remove(&tid).expect("trade exists");
            self.cash += trade.size * price;
            trade.exit_price = Some(price);
            trade.exit_time = Some(time);
            self.closed.push(trade);
        }
        self.liquidated = true;

        // Terminal snapshot after forced settlement
        self.equity_curve.push(EquityPoint {
            timestamp: time,
            equity: self.cash,
            cash: self.cash,
        });

        MarkOutcome {
            equity: self.cash,
            liquidated_now: true,
        }
    }

    /// Immutable view for reporting. Open orders are owned by the order
    /// lifecycle manager and passed in by the engine.
    pub fn snapshot(&self, open_orders: Vec<Order>) -> BrokerSnapshot {
        BrokerSnapshot {
            cash: self.cash,
            last_price: self.last_price,
            equity: self.equity_at(self.last_price),
            commission_paid: self.commission_paid,
            liquidated: self.liquidated,
            equity_curve: self.equity_curve.clone(),
            open_orders,
            open_trades: self.open.values().cloned().collect(),
            closed_trades: self.closed.clone(),
            stats: TradeStats::from_trades(&self.closed),
        }
    }
}
