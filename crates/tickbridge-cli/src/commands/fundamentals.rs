use std::sync::Arc;

use serde_json::{json, Value};

use tickbridge_core::{Symbol, UnifiedFetcher};

use crate::cli::SymbolArgs;
use crate::error::CliError;

pub async fn run(
    args: &SymbolArgs,
    fetcher: &Arc<UnifiedFetcher>,
    exchange: &str,
) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let fundamentals = fetcher.fundamentals(&symbol, exchange).await;
    Ok(json!({ "symbol": symbol, "fundamentals": fundamentals }))
}
