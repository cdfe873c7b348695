//! Hedged two-leg execution, close, and reduce protocol.
//!
//! All two-leg strategies share this module. The invariant it protects: an
//! `open_hedged` call leaves the account with both legs opened or neither.
//! When the second leg fails after the first filled, a reversing market
//! order is submitted once; if that also fails, a critical alert is raised
//! and no further automatic action is taken.
//!
//! Within one call, first-leg placement and fill verification happen before
//! second-leg placement. The less liquid leg always goes first: if the
//! illiquid leg fails, no hedge is open yet.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use funding_arb_core::error::ExecError;
use funding_arb_core::market::MarketKind;
use funding_arb_core::order::{OrderRequest, OrderSide, OrderStatus};
use funding_arb_core::retry::with_retry;
use funding_arb_core::venue::Exchange;

use crate::depth;

/// Book depth requested for pre-trade liquidity checks.
const BOOK_DEPTH: usize = 5;

/// Required liquidity multiple before a leg trades at full size.
const LIQUIDITY_BUFFER: f64 = 1.5;

/// Fraction of available liquidity used when a book is too thin.
const THIN_BOOK_FRACTION: f64 = 0.6;

/// Balance multiple required on buy legs.
const MARGIN_BUFFER: f64 = 1.1;

/// Order-fill polling: attempts and spacing.
const FILL_POLLS: u32 = 3;
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Residual base size below which a leg counts as closed.
pub const RESIDUAL_EPS: f64 = 0.001;

/// Fraction of available liquidity used when closing into a thin book.
const CLOSE_SHRINK: f64 = 0.75;

// =============================================================================
// Symbol helpers
// =============================================================================

/// Base currency of a `BASE/QUOTE` style symbol.
#[must_use]
pub fn base_currency(symbol: &str) -> &str {
    symbol.split('/').next().unwrap_or(symbol)
}

/// Quote currency of a `BASE/QUOTE` style symbol, with contract suffixes
/// (`_PERP`, `:USDT`) stripped.
#[must_use]
pub fn quote_currency(symbol: &str) -> &str {
    let after = symbol.split('/').nth(1).unwrap_or("USDT");
    after
        .split(['_', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(after)
}

// =============================================================================
// Leg descriptions
// =============================================================================

/// One leg of a hedged open.
#[derive(Clone)]
pub struct HedgeLeg {
    pub venue: Arc<dyn Exchange>,
    pub symbol: String,
    pub kind: MarketKind,
    pub side: OrderSide,
}

impl HedgeLeg {
    fn label(&self) -> String {
        format!("{}:{}", self.venue.name(), self.symbol)
    }
}

/// One leg of a hedged close or reduce.
#[derive(Clone)]
pub struct CloseLeg {
    pub venue: Arc<dyn Exchange>,
    pub symbol: String,
    pub kind: MarketKind,
}

impl CloseLeg {
    fn label(&self) -> String {
        format!("{}:{}", self.venue.name(), self.symbol)
    }
}

/// Post-fill state of a successful hedged open.
#[derive(Debug, Clone, Copy)]
pub struct HedgeFill {
    /// Balanced base size placed on each leg.
    pub size_base: f64,
    /// Post-fill quote on leg 1.
    pub price1: f64,
    /// Post-fill quote on leg 2.
    pub price2: f64,
}

/// Outcome of a hedged open that did not error.
#[derive(Debug, Clone)]
pub enum HedgeOutcome {
    /// Both legs filled.
    Filled(HedgeFill),
    /// Nothing was opened; the account is unchanged.
    Aborted { reason: String },
    /// The first leg filled, the second failed, and the reversing order
    /// restored a flat book.
    RolledBack { reason: String },
}

/// Outcome of a hedged close or reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Residual on every touched leg is below [`RESIDUAL_EPS`].
    Closed,
    /// Orders were placed but a residual remains; retry next tick.
    Unverified,
    /// Neither leg had anything to close.
    NothingToClose,
}

// =============================================================================
// Fill polling
// =============================================================================

/// Polls an order until it fills, fails, or the poll budget runs out.
///
/// A partial fill on the final poll counts as success. Status-read errors
/// are tolerated and polling continues.
pub async fn wait_for_fill(venue: &Arc<dyn Exchange>, order_id: &str, max_polls: u32) -> bool {
    for attempt in 1..=max_polls {
        tokio::time::sleep(FILL_POLL_INTERVAL).await;

        let status = match with_retry("order status", || venue.order_status(order_id)).await {
            Ok(status) => status,
            Err(err) => {
                warn!(order_id, attempt, error = %err, "order status unavailable, still polling");
                continue;
            }
        };

        if status == OrderStatus::Filled {
            return true;
        }
        if status == OrderStatus::PartiallyFilled && attempt == max_polls {
            return true;
        }
        if status.is_terminal_failure() {
            warn!(order_id, ?status, "order failed while awaiting fill");
            return false;
        }
    }
    false
}

// =============================================================================
// Margin check
// =============================================================================

async fn check_margin(leg: &HedgeLeg, size_base: f64, price: f64) -> Result<(), ExecError> {
    let balance = with_retry("account balance", || leg.venue.account_balance()).await?;
    let notional = size_base * price;

    match (leg.side, leg.kind) {
        (OrderSide::Buy, _) => {
            let quote = quote_currency(&leg.symbol);
            let available = balance.available(quote);
            if available < notional * MARGIN_BUFFER {
                return Err(ExecError::InsufficientMargin(format!(
                    "{}: {available:.2} {quote} available, {:.2} required",
                    leg.label(),
                    notional * MARGIN_BUFFER
                )));
            }
        }
        (OrderSide::Sell, MarketKind::Spot) => {
            let base = base_currency(&leg.symbol);
            let available = balance.available(base);
            if available < size_base {
                return Err(ExecError::InsufficientMargin(format!(
                    "{}: {available} {base} available, {size_base} required",
                    leg.label()
                )));
            }
        }
        (OrderSide::Sell, _) => {
            // Shorting a derivative consumes quote-currency margin.
            let quote = quote_currency(&leg.symbol);
            let available = balance.available(quote);
            if available < notional * MARGIN_BUFFER {
                return Err(ExecError::InsufficientMargin(format!(
                    "{}: {available:.2} {quote} margin available, {:.2} required",
                    leg.label(),
                    notional * MARGIN_BUFFER
                )));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Hedged open
// =============================================================================

fn relevant_side<'a>(
    book: &'a funding_arb_core::market::OrderBook,
    side: OrderSide,
) -> &'a [funding_arb_core::market::PriceLevel] {
    match side {
        OrderSide::Buy => &book.asks,
        OrderSide::Sell => &book.bids,
    }
}

/// Opens a delta-neutral hedge of `size_usd` notional across two legs.
///
/// The caller has already re-validated the opportunity; this function
/// performs the quote refresh, liquidity and margin checks, ordered
/// placement, and compensation on partial failure.
pub async fn open_hedged(
    leg1: &HedgeLeg,
    leg2: &HedgeLeg,
    size_usd: f64,
    max_spread_pct: f64,
) -> Result<HedgeOutcome, ExecError> {
    // Refresh quotes and re-check the live spread.
    let symbol1 = leg1.symbol.clone();
    let symbol2 = leg2.symbol.clone();
    let price1 = with_retry("refresh quote leg1", || leg1.venue.price(&symbol1)).await?;
    let price2 = with_retry("refresh quote leg2", || leg2.venue.price(&symbol2)).await?;
    if price1 <= 0.0 || price2 <= 0.0 {
        return Err(ExecError::Invalidated(format!(
            "non-positive quotes: {price1} / {price2}"
        )));
    }

    let live_spread_pct = (price1 - price2).abs() / price1.min(price2) * 100.0;
    if live_spread_pct > max_spread_pct {
        return Err(ExecError::Invalidated(format!(
            "live spread {live_spread_pct:.4}% exceeds allowance {max_spread_pct:.4}%"
        )));
    }

    // Liquidity check with a 1.5x buffer; shrink into thin books.
    let book1 = with_retry("execution book leg1", || {
        leg1.venue.order_book(&symbol1, BOOK_DEPTH)
    })
    .await?;
    let book2 = with_retry("execution book leg2", || {
        leg2.venue.order_book(&symbol2, BOOK_DEPTH)
    })
    .await?;

    let required = size_usd;
    let available1 = depth::available_quote(relevant_side(&book1, leg1.side), required * LIQUIDITY_BUFFER);
    let available2 = depth::available_quote(relevant_side(&book2, leg2.side), required * LIQUIDITY_BUFFER);

    let mut size1 = size_usd / price1;
    if available1 < required * LIQUIDITY_BUFFER {
        let shrunk = available1 / price1 * THIN_BOOK_FRACTION;
        info!(
            leg = %leg1.label(),
            available_usd = available1,
            from = size1,
            to = shrunk,
            "thin book, shrinking first leg"
        );
        size1 = shrunk;
    }

    let mut size2 = size_usd / price2;
    if available2 < required * LIQUIDITY_BUFFER {
        let shrunk = available2 / price2 * THIN_BOOK_FRACTION;
        info!(
            leg = %leg2.label(),
            available_usd = available2,
            from = size2,
            to = shrunk,
            "thin book, shrinking second leg"
        );
        size2 = shrunk;
    }

    let size_base = size1.min(size2);
    if size_base <= 0.0 {
        return Err(ExecError::InsufficientLiquidity(format!(
            "hedge size collapsed to zero ({} / {})",
            leg1.label(),
            leg2.label()
        )));
    }

    // Margin on both legs before anything is placed.
    check_margin(leg1, size_base, price1).await?;
    check_margin(leg2, size_base, price2).await?;

    // Less liquid leg first.
    let ratio1 = available1 / required;
    let ratio2 = available2 / required;
    let (first, first_price, second) = if ratio1 <= ratio2 {
        (leg1, price1, leg2)
    } else {
        (leg2, price2, leg1)
    };

    info!(
        first = %first.label(),
        second = %second.label(),
        size_base,
        notional_usd = size_base * first_price,
        "placing hedge legs"
    );

    // First leg.
    let first_order = OrderRequest::market(&first.symbol, first.side, size_base);
    let first_id = match first.venue.place_order(&first_order).await {
        Ok(id) => id,
        Err(err) => {
            warn!(leg = %first.label(), error = %err, "first leg rejected at placement");
            return Ok(HedgeOutcome::Aborted {
                reason: format!("first leg rejected: {err}"),
            });
        }
    };

    if !wait_for_fill(&first.venue, &first_id, FILL_POLLS).await {
        let _ = first.venue.cancel_order(&first_id).await;
        return Ok(HedgeOutcome::Aborted {
            reason: format!("first leg {} did not fill", first.label()),
        });
    }

    // Second leg; failure here requires compensation.
    let second_order = OrderRequest::market(&second.symbol, second.side, size_base);
    let second_failure = match second.venue.place_order(&second_order).await {
        Ok(id) => {
            if wait_for_fill(&second.venue, &id, FILL_POLLS).await {
                None
            } else {
                let _ = second.venue.cancel_order(&id).await;
                Some(format!("second leg {} did not fill", second.label()))
            }
        }
        Err(err) => Some(format!("second leg {} rejected: {err}", second.label())),
    };

    if let Some(reason) = second_failure {
        warn!(reason = %reason, "second leg failed, reversing first leg");
        let reversal = OrderRequest::market(&first.symbol, first.side.opposite(), size_base);
        match first.venue.place_order(&reversal).await {
            Ok(reversal_id) => {
                info!(
                    leg = %first.label(),
                    order_id = %reversal_id,
                    "reversing order submitted, hedge abandoned"
                );
                Ok(HedgeOutcome::RolledBack { reason })
            }
            Err(err) => {
                // Do not retry: the account now holds a naked leg and needs
                // human intervention.
                error!(
                    alert = "critical",
                    leg = %first.label(),
                    size_base,
                    error = %err,
                    "reversing order failed, unhedged exposure remains"
                );
                Err(ExecError::HedgeImbalance {
                    pair: format!("{} <-> {}", leg1.label(), leg2.label()),
                    filled_leg: first.label(),
                    detail: format!("{reason}; reversal failed: {err}"),
                })
            }
        }
    } else {
        // Post-fill quotes for the synthetic position; fall back to the
        // pre-trade refresh if the venue read fails here.
        let post1 = with_retry("post-fill quote leg1", || leg1.venue.price(&symbol1))
            .await
            .unwrap_or(price1);
        let post2 = with_retry("post-fill quote leg2", || leg2.venue.price(&symbol2))
            .await
            .unwrap_or(price2);

        info!(
            leg1 = %leg1.label(),
            leg2 = %leg2.label(),
            size_base,
            price1 = post1,
            price2 = post2,
            "hedge opened"
        );

        Ok(HedgeOutcome::Filled(HedgeFill {
            size_base,
            price1: post1,
            price2: post2,
        }))
    }
}

// =============================================================================
// Hedged close / reduce
// =============================================================================

struct LegState {
    size_base: f64,
    side: OrderSide,
    price: f64,
}

async fn read_leg_state(leg: &CloseLeg) -> Result<Option<LegState>, ExecError> {
    let symbol = leg.symbol.clone();
    let price = with_retry("close quote", || leg.venue.price(&symbol)).await?;

    if leg.kind == MarketKind::Spot {
        let balance = with_retry("close balance", || leg.venue.account_balance()).await?;
        let held = balance.total(base_currency(&leg.symbol));
        if held.abs() <= RESIDUAL_EPS {
            return Ok(None);
        }
        let side = if held > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        return Ok(Some(LegState {
            size_base: held.abs(),
            side,
            price,
        }));
    }

    let positions = with_retry("close positions", || leg.venue.open_positions()).await?;
    match positions.iter().find(|p| p.symbol == leg.symbol) {
        Some(position) if position.size.abs() > RESIDUAL_EPS => Ok(Some(LegState {
            size_base: position.size.abs(),
            side: position.closing_side(),
            price,
        })),
        _ => Ok(None),
    }
}

async fn place_close_order(
    leg: &CloseLeg,
    side: OrderSide,
    size_base: f64,
    await_fill: bool,
) -> Result<(), ExecError> {
    let order = OrderRequest::market(&leg.symbol, side, size_base);
    let id = leg.venue.place_order(&order).await.map_err(ExecError::Venue)?;
    if await_fill && !wait_for_fill(&leg.venue, &id, FILL_POLLS).await {
        warn!(leg = %leg.label(), order_id = %id, "closing order did not fill completely");
    }
    Ok(())
}

async fn verify_leg_flat(leg: &CloseLeg) -> bool {
    match read_leg_state(leg).await {
        Ok(None) => true,
        Ok(Some(state)) => {
            warn!(leg = %leg.label(), residual = state.size_base, "residual position after close");
            false
        }
        Err(err) => {
            warn!(leg = %leg.label(), error = %err, "could not verify close");
            false
        }
    }
}

/// Closes `fraction` of the hedge across both legs. `fraction >= 1.0` is a
/// full close and verifies that both legs are flat afterwards.
///
/// An orphan (only one leg present at the venues) is closed on its own with
/// a warning; the missing leg is never re-opened.
pub async fn close_hedged(
    leg1: &CloseLeg,
    leg2: &CloseLeg,
    fraction: f64,
) -> Result<CloseOutcome, ExecError> {
    let full_close = fraction >= 1.0;
    let state1 = read_leg_state(leg1).await?;
    let state2 = read_leg_state(leg2).await?;

    let (state1, state2) = match (state1, state2) {
        (None, None) => {
            info!(leg1 = %leg1.label(), leg2 = %leg2.label(), "no positions found to close");
            return Ok(CloseOutcome::NothingToClose);
        }
        (Some(state), None) => {
            warn!(leg = %leg1.label(), "orphan leg, closing without its hedge");
            place_close_order(leg1, state.side, state.size_base * fraction.min(1.0), true).await?;
            return Ok(if !full_close || verify_leg_flat(leg1).await {
                CloseOutcome::Closed
            } else {
                CloseOutcome::Unverified
            });
        }
        (None, Some(state)) => {
            warn!(leg = %leg2.label(), "orphan leg, closing without its hedge");
            place_close_order(leg2, state.side, state.size_base * fraction.min(1.0), true).await?;
            return Ok(if !full_close || verify_leg_flat(leg2).await {
                CloseOutcome::Closed
            } else {
                CloseOutcome::Unverified
            });
        }
        (Some(a), Some(b)) => (a, b),
    };

    let mut close1 = state1.size_base * fraction.min(1.0);
    let mut close2 = state2.size_base * fraction.min(1.0);

    // Liquidity on the closing sides; shrink into thin books.
    let symbol1 = leg1.symbol.clone();
    let symbol2 = leg2.symbol.clone();
    let book1 = with_retry("closing book leg1", || {
        leg1.venue.order_book(&symbol1, BOOK_DEPTH)
    })
    .await?;
    let book2 = with_retry("closing book leg2", || {
        leg2.venue.order_book(&symbol2, BOOK_DEPTH)
    })
    .await?;

    let walk1 = depth::walk(
        relevant_side(&book1, state1.side),
        close1 * state1.price * LIQUIDITY_BUFFER,
    );
    let walk2 = depth::walk(
        relevant_side(&book2, state2.side),
        close2 * state2.price * LIQUIDITY_BUFFER,
    );

    if walk1.filled_base < close1 {
        warn!(
            leg = %leg1.label(),
            available = walk1.filled_base,
            required = close1,
            "insufficient depth for close, shrinking"
        );
        close1 = walk1.filled_base * CLOSE_SHRINK;
    }
    if walk2.filled_base < close2 {
        warn!(
            leg = %leg2.label(),
            available = walk2.filled_base,
            required = close2,
            "insufficient depth for close, shrinking"
        );
        close2 = walk2.filled_base * CLOSE_SHRINK;
    }

    // Less liquid leg first.
    let ratio1 = if close1 > 0.0 {
        walk1.filled_base / close1
    } else {
        f64::INFINITY
    };
    let ratio2 = if close2 > 0.0 {
        walk2.filled_base / close2
    } else {
        f64::INFINITY
    };

    let legs = if ratio1 <= ratio2 {
        [(leg1, state1.side, close1), (leg2, state2.side, close2)]
    } else {
        [(leg2, state2.side, close2), (leg1, state1.side, close1)]
    };

    for (leg, side, size) in legs {
        if size <= 0.0 {
            continue;
        }
        place_close_order(leg, side, size, true).await?;
    }

    if !full_close {
        info!(
            leg1 = %leg1.label(),
            leg2 = %leg2.label(),
            fraction,
            "hedge reduced"
        );
        return Ok(CloseOutcome::Closed);
    }

    let flat1 = verify_leg_flat(leg1).await;
    let flat2 = verify_leg_flat(leg2).await;
    if flat1 && flat2 {
        info!(leg1 = %leg1.label(), leg2 = %leg2.label(), "hedge closed");
        Ok(CloseOutcome::Closed)
    } else {
        Ok(CloseOutcome::Unverified)
    }
}
