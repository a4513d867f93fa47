use std::sync::Arc;

use serde_json::{json, Value};

use tickbridge_core::UnifiedFetcher;

use crate::cli::SearchArgs;
use crate::error::CliError;

pub async fn run(
    args: &SearchArgs,
    fetcher: &Arc<UnifiedFetcher>,
    exchange: &str,
) -> Result<Value, CliError> {
    let results = fetcher.search(&args.query, exchange).await;
    Ok(json!({ "query": args.query, "results": results }))
}
