use std::sync::Arc;

use serde_json::{json, Value};

use tickbridge_core::{Symbol, UnifiedFetcher};

use crate::cli::QuoteArgs;
use crate::error::CliError;

pub async fn run(
    args: &QuoteArgs,
    fetcher: &Arc<UnifiedFetcher>,
    exchange: &str,
) -> Result<Value, CliError> {
    let symbols = args
        .symbols
        .iter()
        .map(|raw| Symbol::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let results = fetcher.quotes(&symbols, exchange).await;

    let quotes = results
        .into_iter()
        .map(|(symbol, quote)| {
            json!({
                "symbol": symbol,
                "quote": quote,
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({ "exchange": exchange, "quotes": quotes }))
}
