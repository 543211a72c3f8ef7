use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lxp_poller::app().await
}
