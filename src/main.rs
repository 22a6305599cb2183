#[tokio::main]
async fn main() -> anyhow::Result<()> {
    inbox_server::run().await
}
