use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cogstore::bot::Bot;
use cogstore::config::Settings;
use cogstore::gateway::Router;
use log::{error, info};
use tokio::io::{stdin, stdout, BufReader};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Command prefix; repeat for several.
    #[arg(short, long)]
    prefix: Vec<String>,

    #[arg(long)]
    bot_id: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if !args.prefix.is_empty() {
        settings.prefixes = args.prefix;
    }
    if args.bot_id.is_some() {
        settings.bot_id = args.bot_id;
    }

    let bot = Arc::new(Bot::new(settings).await?);
    let router = Router::new(bot.clone());
    info!(
        "Reading events from stdin. Data in {:?}, prefixes {:?}",
        bot.settings().data_dir,
        bot.settings().prefixes
    );

    tokio::select! {
        res = router.handle_stream(BufReader::new(stdin()), stdout()) => {
            if let Err(e) = res {
                error!("Event stream failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received. Waiting for handlers to finish...");
        }
    }

    bot.wait().await;
    info!("All writes complete. Exiting.");
    Ok(())
}
