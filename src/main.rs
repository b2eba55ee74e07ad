#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentsim::cli::app::run().await
}
