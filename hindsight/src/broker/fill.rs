use crate::broker::order::{Order, OrderAction, OrderType};
use hindsight_data::bar::Bar;

/// Price and quantity a fill policy decided an order executes at for one
/// bar. `None` means the order does not fill on this bar.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FillInfo {
    pub price: f64,
    pub quantity: i64,
}

/// Inspects the current bar and an active order, deciding whether and at
/// what price the order executes. The default policy produces single fills
/// for the full remaining quantity.
pub trait FillStrategy {
    /// Fill decision for `order` against `bar`. `order` is mutable so the
    /// two-phase stop-limit can record its triggered stop leg.
    fn fill(&self, order: &mut Order, bar: &Bar) -> Option<FillInfo>;
}

/// Fill policy for bar-resolution feeds (second and coarser), using the
/// bar's OHLC shape.
#[derive(Debug, Default, Clone)]
pub struct BarFillStrategy;

/// Fill policy for tick-resolution feeds: every decision is made against
/// the traded tick price.
#[derive(Debug, Default, Clone)]
pub struct TickFillStrategy;

impl FillStrategy for BarFillStrategy {
    fn fill(&self, order: &mut Order, bar: &Bar) -> Option<FillInfo> {
        let quantity = order.remaining();
        if quantity <= 0 {
            return None;
        }

        let price = match order.order_type {
            OrderType::Market => Some(market_price(order, bar)),
            OrderType::Limit => limit_price(order.action, order.limit_price?, bar, true),
            OrderType::Stop => {
                let stop = order.stop_price?;
                if !order.stop_hit {
                    order.stop_hit = stop_triggered(order.action, stop, bar);
                }
                if order.stop_hit {
                    Some(stop_fill_price(order.action, stop, bar))
                } else {
                    None
                }
            }
            OrderType::StopLimit => {
                let stop = order.stop_price?;
                let limit = order.limit_price?;

                let mut triggered_now = false;
                if !order.stop_hit {
                    order.stop_hit = stop_triggered(order.action, stop, bar);
                    triggered_now = order.stop_hit;
                }
                if order.stop_hit {
                    // On the triggering bar the open pre-dates the trigger, so
                    // only the limit price itself is usable.
                    limit_price(order.action, limit, bar, !triggered_now)
                } else {
                    None
                }
            }
        };

        price.map(|price| FillInfo { price, quantity })
    }
}

impl FillStrategy for TickFillStrategy {
    fn fill(&self, order: &mut Order, bar: &Bar) -> Option<FillInfo> {
        let quantity = order.remaining();
        if quantity <= 0 {
            return None;
        }

        let tick = bar.last_price();
        let price = match order.order_type {
            OrderType::Market => Some(tick),
            OrderType::Limit => {
                let limit = order.limit_price?;
                match order.action {
                    OrderAction::Buy | OrderAction::BuyToCover if tick <= limit => Some(tick),
                    OrderAction::Sell | OrderAction::SellShort if tick >= limit => Some(tick),
                    _ => None,
                }
            }
            OrderType::Stop | OrderType::StopLimit => {
                let stop = order.stop_price?;
                if !order.stop_hit {
                    order.stop_hit = match order.action {
                        OrderAction::Buy | OrderAction::BuyToCover => tick >= stop,
                        OrderAction::Sell | OrderAction::SellShort => tick <= stop,
                    };
                }
                if !order.stop_hit {
                    None
                } else if order.order_type == OrderType::Stop {
                    Some(tick)
                } else {
                    let limit = order.limit_price?;
                    match order.action {
                        OrderAction::Buy | OrderAction::BuyToCover if tick <= limit => Some(tick),
                        OrderAction::Sell | OrderAction::SellShort if tick >= limit => Some(tick),
                        _ => None,
                    }
                }
            }
        };

        price.map(|price| FillInfo { price, quantity })
    }
}

/// Market orders fill at the open (close for fill-on-close), capped by the
/// bar's range.
fn market_price(order: &Order, bar: &Bar) -> f64 {
    let raw = if order.fill_on_close { bar.close } else { bar.open };
    raw.clamp(bar.low, bar.high)
}

/// Limit fill: a buy fills when the bar trades at or below the limit, at
/// the better of open and limit when the open already satisfies it.
fn limit_price(action: OrderAction, limit: f64, bar: &Bar, use_open: bool) -> Option<f64> {
    match action {
        OrderAction::Buy | OrderAction::BuyToCover => {
            if bar.low <= limit {
                if use_open && bar.open <= limit {
                    Some(bar.open)
                } else {
                    Some(limit)
                }
            } else {
                None
            }
        }
        OrderAction::Sell | OrderAction::SellShort => {
            if bar.high >= limit {
                if use_open && bar.open >= limit {
                    Some(bar.open)
                } else {
                    Some(limit)
                }
            } else {
                None
            }
        }
    }
}

/// A stop order triggers once the bar's range touches the stop price in the
/// adverse direction.
fn stop_triggered(action: OrderAction, stop: f64, bar: &Bar) -> bool {
    match action {
        OrderAction::Buy | OrderAction::BuyToCover => bar.high >= stop,
        OrderAction::Sell | OrderAction::SellShort => bar.low <= stop,
    }
}

/// Once triggered, a stop converts to market at the stop price, or the open
/// when the open already crossed it.
fn stop_fill_price(action: OrderAction, stop: f64, bar: &Bar) -> f64 {
    match action {
        OrderAction::Buy | OrderAction::BuyToCover => {
            if bar.open >= stop {
                bar.open
            } else {
                stop
            }
        }
        OrderAction::Sell | OrderAction::SellShort => {
            if bar.open <= stop {
                bar.open
            } else {
                stop
            }
        }
    }
}
