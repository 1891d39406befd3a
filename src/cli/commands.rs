use anyhow::{Context, Result};
use clap::ArgMatches;
use log::{info, warn};
use std::future::Future;
use std::time::Duration;

use crate::devices::{all_registers, find_register};
use crate::modbus::ModbusTransport;
use crate::output::DataFormatter;
use crate::services::PollService;

pub async fn handle_subcommands<T: ModbusTransport>(
    matches: &ArgMatches,
    service: &PollService<T>,
    formatter: &dyn DataFormatter,
    interval: Duration,
) -> Result<()> {
    match matches.subcommand() {
        Some(("registers", _)) => {
            let registers: Vec<_> = all_registers().collect();
            println!("{}", formatter.format_catalog(&registers));
        }
        Some(("read", sub)) => {
            let address: u16 = sub
                .get_one::<String>("address")
                .context("missing register address")?
                .parse()
                .context("register address must be a number between 0 and 65535")?;
            if find_register(address).is_none() {
                warn!("Register {} is not part of the controller map", address);
            }

            info!("🔍 Reading register {}...", address);
            match service.read_register(address).await? {
                Some(value) => match find_register(address) {
                    Some(register) => println!("{} ({}): {} [raw {}]", register.display_name, address, register.render(value), value),
                    None => println!("{}: {}", address, value),
                },
                None => println!("❌ Register {}: read failed", address),
            }
        }
        Some(("watch", _)) => watch(service, formatter, interval).await?,
        _ => {
            info!("🔍 Running one poll cycle...");
            let snapshot = service.poll().await?;
            println!("{}", formatter.format_snapshot(&snapshot));
        }
    }
    Ok(())
}

async fn watch<T: ModbusTransport>(
    service: &PollService<T>,
    formatter: &dyn DataFormatter,
    interval: Duration,
) -> Result<()> {
    info!("🔄 Polling every {:?}, press Ctrl+C to stop", interval);
    watch_until(service, formatter, interval, tokio::signal::ctrl_c()).await
}

/// Polls on every tick until `shutdown` resolves. A cycle still running at
/// that point is abandoned and its session closed.
async fn watch_until<T, S>(
    service: &PollService<T>,
    formatter: &dyn DataFormatter,
    interval: Duration,
    shutdown: S,
) -> Result<()>
where
    T: ModbusTransport,
    S: Future,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    let mut cycles = 0u32;
    let mut failed = 0u32;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("🛑 Stopping watch mode");
                break;
            }
            _ = ticker.tick() => {}
        }

        tokio::select! {
            result = service.poll() => {
                let snapshot = result?;
                cycles += 1;
                if snapshot.error.is_some() {
                    failed += 1;
                }
                println!("{}", formatter.format_snapshot(&snapshot));
            }
            _ = &mut shutdown => {
                info!("🛑 Stopping watch mode, abandoning the running cycle");
                service.cancel().await;
                break;
            }
        }
    }

    info!("📊 {} cycles, {} with errors", cycles, failed);
    Ok(())
}
