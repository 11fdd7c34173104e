#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mollie_pos_terminal_lib::run().await
}
