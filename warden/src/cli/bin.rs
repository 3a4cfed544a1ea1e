// Binary entry point for warden
// A thin wrapper around the library's CLI

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = warden::cli::run().await {
        eprintln!("warden fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
