mod host;
mod relay;
mod store;
mod web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
