//! Dispatch Demo - Entry Point
//!
//! Demo binary that embeds the dispatch fabric with a streaming executor.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dispatch_demo::run().await
}
