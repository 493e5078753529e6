#[tokio::main]
async fn main() -> anyhow::Result<()> {
    marketplace_sync::run().await
}
