use anyhow::Result;
use log::info;

use frisko_poller::cli::{build_cli, handle_subcommands};
use frisko_poller::output::formatter_for;
use frisko_poller::{Config, PollService};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = build_cli().get_matches();
    let config = Config::from_matches(&matches)?;
    info!("🖥️  Frisko poller v{}", frisko_poller::VERSION);

    let service = PollService::new(&config);
    let formatter = formatter_for(&config.output.default_format);

    handle_subcommands(&matches, &service, formatter.as_ref(), config.polling.update_interval()).await
}
