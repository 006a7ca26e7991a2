use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BrokerError;
use crate::execution::broker::BrokerState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderStatus {
    /// Created but not yet accepted by the lifecycle manager
    Pending,
    /// Contingent order waiting for its parent to fill
    Dormant,
    /// Working order, evaluated against every price update
    Open,
    /// Stop price crossed; waiting for the limit condition (stop-limit only)
    Triggered,
    Filled,
    Cancelled,
}

/// Intent to trade. Size is signed: positive opens/extends a long,
/// negative a short. A contingent order carries a back-reference to its
/// parent; it does not own it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub size: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub status: OrderStatus,
    pub parent_id: Option<u64>,
    pub trade_id: Option<u64>,
    pub is_contingent: bool,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.size < 0.0
    }

    /// Limit condition: reach-or-better
    fn limit_satisfied(&self, price: f64) -> bool {
        match self.limit_price {
            Some(limit) if self.is_long() => price <= limit,
            Some(limit) => price >= limit,
            None => true,
        }
    }

    /// Stop condition: reach-or-worse
    fn stop_crossed(&self, price: f64) -> bool {
        match self.stop_price {
            Some(stop) if self.is_long() => price >= stop,
            Some(stop) => price <= stop,
            None => true,
        }
    }
}

/// Parameters for a new parent order
#[derive(Debug, Clone, Default)]
pub struct OrderRequest {
    pub size: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(size: f64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn limit(size: f64, limit_price: f64) -> Self {
        Self {
            size,
            limit_price: Some(limit_price),
            ..Default::default()
        }
    }

    pub fn with_sl(mut self, sl_price: f64) -> Self {
        self.sl_price = Some(sl_price);
        self
    }

    pub fn with_tp(mut self, tp_price: f64) -> Self {
        self.tp_price = Some(tp_price);
        self
    }
}

/// A fill produced by one price update
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: u64,
    pub trade_id: Option<u64>,
    pub price: f64,
    pub time: DateTime<Utc>,
    pub closed_trades: Vec<u64>,
}

/// Order state machine: PENDING -> OPEN -> {FILLED | CANCELLED}, with
/// DORMANT as the pre-state of contingent orders and TRIGGERED for
/// stop-limit orders whose stop has crossed.
///
/// Orders live in an id-indexed table; evaluation walks ids in ascending
/// order, which makes fill sequencing deterministic for a given price
/// series. All cash and trade mutation is delegated to
/// [`BrokerState::apply_fill`].
pub struct OrderLifecycleManager {
    orders: BTreeMap<u64, Order>,
    next_id: u64,
    hedge_mode: bool,
    exclusive_mode: bool,
}

impl OrderLifecycleManager {
    pub fn new(hedge_mode: bool, exclusive_mode: bool) -> Self {
        Self {
            orders: BTreeMap::new(),
            next_id: 1,
            hedge_mode,
            exclusive_mode,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn order(&self, id: u64) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Working orders (everything not yet filled or cancelled)
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Open | OrderStatus::Dormant | OrderStatus::Triggered
                )
            })
            .cloned()
            .collect()
    }

    /// Validate and accept a new parent order, creating dormant SL/TP
    /// contingent orders alongside it.
    ///
    /// Hedge validation happens here, before any exclusivity concern: with
    /// hedge mode off, an opposing order may at most flatten the current
    /// exposure - anything that would flip direction is rejected with
    /// [`BrokerError::InvalidOrderState`].
    pub fn submit(
        &mut self,
        broker: &BrokerState,
        request: OrderRequest,
    ) -> Result<u64, BrokerError> {
        if broker.is_liquidated() {
            return Err(BrokerError::Liquidated);
        }

        if request.size == 0.0 || !request.size.is_finite() {
            return Err(BrokerError::InvalidOrderState(format!(
                "order size must be finite and non-zero, got {}",
                request.size
            )));
        }

        let net = broker.net_position();
        if !self.hedge_mode
            && net != 0.0
            && request.size.signum() != net.signum()
            && request.size.abs() > net.abs()
        {
            return Err(BrokerError::InvalidOrderState(format!(
                "order of size {} would reverse a position of {} with hedge mode off",
                request.size, net
            )));
        }

        let created_at = Utc::now();
        let parent_id = self.allocate_id();
        let mut order = Order {
            id: parent_id,
            size: request.size,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            sl_price: request.sl_price,
            tp_price: request.tp_price,
            status: OrderStatus::Pending,
            parent_id: None,
            trade_id: None,
            is_contingent: false,
            created_at,
        };
        order.status = OrderStatus::Open;
        self.orders.insert(parent_id, order);

        // Contingent orders close the parent's position: opposite size,
        // dormant until the parent fills.
        if let Some(sl) = request.sl_price {
            let id = self.allocate_id();
            self.orders.insert(
                id,
                Order {
                    id,
                    size: -request.size,
                    limit_price: None,
                    stop_price: Some(sl),
                    sl_price: None,
                    tp_price: None,
                    status: OrderStatus::Dormant,
                    parent_id: Some(parent_id),
                    trade_id: None,
                    is_contingent: true,
                    created_at,
                },
            );
        }
        if let Some(tp) = request.tp_price {
            let id = self.allocate_id();
            self.orders.insert(
                id,
                Order {
                    id,
                    size: -request.size,
                    limit_price: Some(tp),
                    stop_price: None,
                    sl_price: None,
                    tp_price: None,
                    status: OrderStatus::Dormant,
                    parent_id: Some(parent_id),
                    trade_id: None,
                    is_contingent: true,
                    created_at,
                },
            );
        }

        tracing::debug!(
            order_id = parent_id,
            size = request.size,
            "order accepted"
        );
        Ok(parent_id)
    }

    /// Cancel a working order
    pub fn cancel(&mut self, id: u64) -> Result<(), BrokerError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(BrokerError::UnknownOrder(id))?;

        match order.status {
            OrderStatus::Pending
            | OrderStatus::Dormant
            | OrderStatus::Open
            | OrderStatus::Triggered => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            OrderStatus::Filled | OrderStatus::Cancelled => Err(BrokerError::InvalidOrderState(
                format!("order {} cannot be cancelled from {:?}", id, order.status),
            )),
        }
    }

    /// Evaluate all working orders against a new price.
    ///
    /// Fill sequencing within one update is by ascending order id.
    /// Contingent orders activated by a parent fill become eligible from the
    /// next price update. Exclusive-mode sibling cancellation happens in the
    /// same pass as the fill, before any further order is evaluated, so both
    /// siblings can never fill.
    pub fn on_price(
        &mut self,
        broker: &mut BrokerState,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<Vec<FillEvent>, BrokerError> {
        if broker.is_liquidated() {
            return Ok(Vec::new());
        }
        if !price.is_finite() || price <= 0.0 {
            tracing::warn!(price, "dropping inconsistent price update");
            return Ok(Vec::new());
        }

        let candidates: Vec<u64> = self
            .orders
            .iter()
            .filter(|(_, o)| matches!(o.status, OrderStatus::Open | OrderStatus::Triggered))
            .map(|(id, _)| *id)
            .collect();

        let mut events = Vec::new();

        for id in candidates {
            let order = match self.orders.get(&id) {
                // A sibling cancellation earlier in this pass may have
                // removed the order from play.
                Some(o) if matches!(o.status, OrderStatus::Open | OrderStatus::Triggered) => {
                    o.clone()
                }
                _ => continue,
            };

            let mut order = order;
            if order.status == OrderStatus::Open && order.stop_price.is_some() {
                if !order.stop_crossed(price) {
                    continue;
                }
                order.status = OrderStatus::Triggered;
                self.orders.insert(id, order.clone());
            }

            if !order.limit_satisfied(price) {
                continue;
            }

            // A long entry must be funded at the fill price; an
            // unaffordable order is cancelled rather than allowed to push
            // cash negative.
            if order.trade_id.is_none() && order.size > 0.0 {
                let needed = order.size * price * (1.0 + broker.commission_rate());
                if needed > broker.cash() {
                    tracing::warn!(
                        order_id = id,
                        needed,
                        cash = broker.cash(),
                        "cancelling unfunded order"
                    );
                    let stored = self.orders.get_mut(&id).expect("order exists");
                    stored.status = OrderStatus::Cancelled;
                    continue;
                }
            }

            let outcome = broker.apply_fill(&order, price, time)?;

            {
                let stored = self.orders.get_mut(&id).expect("order exists");
                stored.status = OrderStatus::Filled;
                stored.trade_id = outcome.trade_id;
            }

            if order.is_contingent {
                if self.exclusive_mode {
                    self.cancel_siblings(&order);
                }
            } else {
                self.activate_children(&order, outcome.trade_id);
            }

            // A fully closed trade leaves nothing for its remaining
            // contingent orders to close.
            for trade_id in &outcome.closed_trades {
                self.cancel_orders_for_trade(*trade_id);
            }

            tracing::debug!(
                order_id = id,
                trade_id = ?outcome.trade_id,
                price,
                "order filled"
            );

            events.push(FillEvent {
                order_id: id,
                trade_id: outcome.trade_id,
                price,
                time,
                closed_trades: outcome.closed_trades,
            });
        }

        Ok(events)
    }

    /// Wake the dormant SL/TP orders of a just-filled parent and point them
    /// at the parent's trade. If the parent's fill left no open trade (it
    /// only flattened opposing exposure), the contingents are cancelled
    /// instead.
    fn activate_children(&mut self, parent: &Order, trade_id: Option<u64>) {
        let child_ids: Vec<u64> = self
            .orders
            .values()
            .filter(|o| o.parent_id == Some(parent.id) && o.status == OrderStatus::Dormant)
            .map(|o| o.id)
            .collect();

        for id in child_ids {
            let child = self.orders.get_mut(&id).expect("child exists");
            match trade_id {
                Some(tid) => {
                    child.status = OrderStatus::Open;
                    child.trade_id = Some(tid);
                }
                None => child.status = OrderStatus::Cancelled,
            }
        }

        // Under exclusive mode a trade keeps at most one pending stop-loss
        // and one take-profit: newly activated contingents replace older
        // ones targeting the same trade.
        if self.exclusive_mode {
            if let Some(tid) = trade_id {
                self.dedup_contingents(tid, parent.id);
            }
        }
    }

    fn dedup_contingents(&mut self, trade_id: u64, newest_parent: u64) {
        let stale: Vec<u64> = self
            .orders
            .values()
            .filter(|o| {
                o.is_contingent
                    && o.trade_id == Some(trade_id)
                    && o.parent_id != Some(newest_parent)
                    && matches!(o.status, OrderStatus::Open | OrderStatus::Triggered)
            })
            .map(|o| o.id)
            .collect();

        for id in stale {
            if let Some(order) = self.orders.get_mut(&id) {
                order.status = OrderStatus::Cancelled;
                tracing::debug!(order_id = id, "replaced stale contingent order");
            }
        }
    }

    /// Cancel the other contingent order(s) sharing this order's parent
    fn cancel_siblings(&mut self, filled: &Order) {
        let Some(parent_id) = filled.parent_id else {
            return;
        };

        let siblings: Vec<u64> = self
            .orders
            .values()
            .filter(|o| {
                o.id != filled.id
                    && o.parent_id == Some(parent_id)
                    && matches!(
                        o.status,
                        OrderStatus::Open | OrderStatus::Dormant | OrderStatus::Triggered
                    )
            })
            .map(|o| o.id)
            .collect();

        for id in siblings {
            if let Some(order) = self.orders.get_mut(&id) {
                order.status = OrderStatus::Cancelled;
                tracing::debug!(order_id = id, "cancelled sibling contingent order");
            }
        }
    }

    fn cancel_orders_for_trade(&mut self, trade_id: u64) {
        let dangling: Vec<u64> = self
            .orders
            .values()
            .filter(|o| {
                o.trade_id == Some(trade_id)
                    && matches!(
                        o.status,
                        OrderStatus::Open | OrderStatus::Dormant | OrderStatus::Triggered
                    )
            })
            .map(|o| o.id)
            .collect();

        for id in dangling {
            if let Some(order) = self.orders.get_mut(&id) {
                order.status = OrderStatus::Cancelled;
            }
        }
    }
}
