use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tickbridge", version, about = "Resilient multi-provider market data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Pretty-print the JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Use the deterministic mock provider instead of live upstreams.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Exchange code used to resolve the provider chain.
    #[arg(long, global = true, default_value = "NSE")]
    pub exchange: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch normalized quotes for one or more symbols.
    Quote(QuoteArgs),
    /// Fetch OHLCV history for a symbol.
    History(HistoryArgs),
    /// Search instruments across providers.
    Search(SearchArgs),
    /// Fetch fundamentals for a symbol.
    Fundamentals(SymbolArgs),
    /// Build a merged multi-provider snapshot for a symbol.
    Snapshot(SymbolArgs),
    /// List provider availability and streaming state.
    Sources,
    /// Inspect or clear the response cache.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Symbols to quote.
    #[arg(required = true)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub symbol: String,

    /// Bar interval (1m, 5m, 15m, 1h, 1d).
    #[arg(long, default_value = "1d")]
    pub interval: String,

    /// Range start, YYYY-MM-DD.
    #[arg(long)]
    pub start: String,

    /// Range end, YYYY-MM-DD.
    #[arg(long)]
    pub end: String,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub query: String,
}

#[derive(Debug, Args)]
pub struct SymbolArgs {
    pub symbol: String,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Clear every cache tier instead of reporting entry counts.
    #[arg(long)]
    pub clear: bool,
}
