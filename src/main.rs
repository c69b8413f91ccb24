#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    reclaim_server::run().await
}
