#[tokio::main]
async fn main() -> anyhow::Result<()> {
    influx_upstream_proxy::run().await
}
