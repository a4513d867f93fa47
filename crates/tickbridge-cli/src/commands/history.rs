use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};
use time::macros::format_description;
use time::Date;

use tickbridge_core::{Interval, Symbol, UnifiedFetcher};

use crate::cli::HistoryArgs;
use crate::error::CliError;

pub async fn run(
    args: &HistoryArgs,
    fetcher: &Arc<UnifiedFetcher>,
    exchange: &str,
) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let interval = Interval::from_str(&args.interval)?;
    let start = parse_date(&args.start)?;
    let end = parse_date(&args.end)?;

    let bars = fetcher
        .history(&symbol, exchange, interval, start, end)
        .await;

    Ok(json!({
        "symbol": symbol,
        "exchange": exchange,
        "interval": interval,
        "bars": bars,
    }))
}

fn parse_date(raw: &str) -> Result<Date, CliError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw, &format)
        .map_err(|_| CliError::Command(format!("invalid date '{raw}', expected YYYY-MM-DD")))
}
