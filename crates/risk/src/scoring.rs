//! Composite risk scoring for scanned opportunities.
//!
//! Each strategy assembles a bounded score when it builds an opportunity.
//! The coefficients here are the reference calibration; tuning belongs in
//! config, not code.

/// Liquidity reference notional against which book depth is judged, USD.
pub const LIQUIDITY_REFERENCE_USD: f64 = 50_000.0;

/// Fixed counterparty risk per venue, averaged over both legs.
#[must_use]
pub fn venue_risk(venue: &str) -> f64 {
    if venue.eq_ignore_ascii_case("binance") || venue.eq_ignore_ascii_case("bybit") {
        5.0
    } else if venue.eq_ignore_ascii_case("bitget") || venue.eq_ignore_ascii_case("okx") {
        10.0
    } else {
        15.0
    }
}

/// Inputs to the composite score, collected during a scan.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    /// Signed entry spread, percent.
    pub entry_spread_pct: f64,
    /// Maximum allowable spread for the geometry, percent.
    pub max_allowable_spread_pct: f64,
    /// Walked book depth on leg 1, USD.
    pub liquidity1_usd: f64,
    /// Walked book depth on leg 2, USD.
    pub liquidity2_usd: f64,
    pub venue1: &'a str,
    pub venue2: &'a str,
    /// True for same-venue geometries (lower liquidity weight).
    pub same_venue: bool,
    /// Funding cadence of leg 1, hours; `None` for spot legs.
    pub payment_interval1: Option<f64>,
    /// Funding cadence of leg 2, hours; `None` for spot legs.
    pub payment_interval2: Option<f64>,
    /// Fixed venue contribution instead of the per-venue table average.
    /// Cross-venue spot-perp pins this at 15.
    pub venue_risk_override: Option<f64>,
}

/// Computes the composite risk score, clamped to [0, 100].
///
/// Components: spread utilisation (up to 40), liquidity shortfall against
/// $50k (weight 25 same-venue, 30 cross-venue), per-venue counterparty risk
/// (leg average), and funding risk (base 10, +10 when both legs pay funding
/// on mismatched cadences).
#[must_use]
pub fn risk_score(inputs: &ScoreInputs<'_>) -> f64 {
    let spread_risk = if inputs.max_allowable_spread_pct != 0.0 {
        (inputs.entry_spread_pct / inputs.max_allowable_spread_pct).abs() * 40.0
    } else {
        40.0
    };

    let liquidity_weight = if inputs.same_venue { 25.0 } else { 30.0 };
    let min_liquidity = inputs.liquidity1_usd.min(inputs.liquidity2_usd);
    let liquidity_risk = (1.0 - min_liquidity / LIQUIDITY_REFERENCE_USD) * liquidity_weight;

    let venue = inputs
        .venue_risk_override
        .unwrap_or_else(|| (venue_risk(inputs.venue1) + venue_risk(inputs.venue2)) / 2.0);

    let funding_risk = match (inputs.payment_interval1, inputs.payment_interval2) {
        (Some(a), Some(b)) if (a - b).abs() > f64::EPSILON => 20.0,
        _ => 10.0,
    };

    (spread_risk + liquidity_risk + venue + funding_risk).clamp(0.0, 100.0)
}
