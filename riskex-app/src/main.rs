mod app;
mod assets;
mod console;

use anyhow::Context;
use clap::Parser;

use app::{App, Cli};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(async {
        let app = App::new(cli).await?;
        app.run().await
    })
}
