#[tokio::main]
async fn main() -> anyhow::Result<()> {
    appstore::bootstrapper::run().await
}
