//! Provider adapters translating upstream payloads into the common types.

mod alphavantage;
mod coingecko;
mod kite;
mod mock;
mod nse;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use coingecko::CoingeckoAdapter;
pub use kite::KiteAdapter;
pub use mock::MockAdapter;
pub use nse::NseAdapter;
pub use yahoo::YahooAdapter;

use time::Date;

use crate::OhlcvBar;

/// Inclusive epoch-second bounds for a date range; the end bound extends to
/// the end of its day so same-day intraday bars survive clipping.
pub(crate) fn epoch_bounds(start: Date, end: Date) -> (i64, i64) {
    let start_ts = start.midnight().assume_utc().unix_timestamp();
    let end_ts = end.midnight().assume_utc().unix_timestamp() + 86_399;
    (start_ts, end_ts)
}

/// Drop bars the provider returned outside the caller's requested range.
/// Range coarsening routinely over-fetches; the caller never sees it.
pub(crate) fn clip_bars(mut bars: Vec<OhlcvBar>, start: Date, end: Date) -> Vec<OhlcvBar> {
    let (start_ts, end_ts) = epoch_bounds(start, end);
    bars.retain(|bar| bar.ts >= start_ts && bar.ts <= end_ts);
    bars
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn clip_drops_bars_outside_the_requested_range() {
        let inside = OhlcvBar::new(1_735_776_000, 10.0, 11.0, 9.0, 10.5, None)
            .expect("valid bar"); // 2025-01-02
        let before = OhlcvBar::new(1_700_000_000, 10.0, 11.0, 9.0, 10.5, None)
            .expect("valid bar");

        let clipped = clip_bars(
            vec![before, inside],
            date!(2025 - 01 - 01),
            date!(2025 - 01 - 31),
        );
        assert_eq!(clipped, vec![inside]);
    }
}
