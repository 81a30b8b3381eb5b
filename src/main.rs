#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aqi_relay_lib::run().await
}
