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
    let snapshot = fetcher.snapshot(&symbol, exchange).await;
    Ok(json!({ "snapshot": snapshot }))
}
