use std::sync::Arc;

use serde_json::{json, Value};

use tickbridge_core::UnifiedFetcher;

use crate::cli::CacheArgs;
use crate::error::CliError;

pub async fn run(args: &CacheArgs, fetcher: &Arc<UnifiedFetcher>) -> Result<Value, CliError> {
    let cache = fetcher.cache();

    if args.clear {
        cache.clear().await;
        return Ok(json!({ "cleared": true }));
    }

    let tiers = cache
        .entry_counts()
        .await
        .into_iter()
        .map(|(tier, entries)| json!({ "tier": tier, "entries": entries }))
        .collect::<Vec<_>>();

    Ok(json!({ "tiers": tiers }))
}
