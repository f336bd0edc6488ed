use clap::Parser;
use shapes_bridge::{application, logger, Cli};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    info!("shapes-bridge {} starting", shapes_bridge::VERSION);

    if let Err(e) = application::run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
