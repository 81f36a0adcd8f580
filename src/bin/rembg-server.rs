//! rembg-server binary
//!
//! Serves `POST /rembg` and `GET /health`; see `rembg-server --help`.

use rembg_server::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
