use clap::Parser as _;
use dnsgate::{setup_logging, App, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.log_file.as_deref())?;

    App::run_until_completion(args).await
}
