use std::sync::Arc;

use serde_json::{json, Value};

use tickbridge_core::{MarketSource, ProviderKey, UnifiedFetcher};

use crate::error::CliError;

pub async fn run(fetcher: &Arc<UnifiedFetcher>) -> Result<Value, CliError> {
    let registry = fetcher.registry();

    let mut sources = Vec::with_capacity(ProviderKey::ALL.len());
    for key in ProviderKey::ALL {
        let row = match registry.instance(key).await {
            Ok(adapter) => json!({
                "provider": key,
                "available": true,
                "streaming": adapter.supports_streaming(),
            }),
            Err(error) => json!({
                "provider": key,
                "available": false,
                "reason": error.to_string(),
            }),
        };
        sources.push(row);
    }

    Ok(json!({ "sources": sources }))
}
