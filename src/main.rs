use anyhow::{Context, anyhow};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::io::Write;
use std::path::PathBuf;

use lte_rx_phy::ReceiverConfig;
use lte_rx_phy::simulation::{load_scenario, run_scenario};

const USAGE: &str = "Usage: lte-rx-phy <scenario.json> [receiver.toml]";

fn main() -> anyhow::Result<()> {
    // Logging setup; records carry the virtual simulation time.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("lte_rx_phy"), LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            let now = embassy_time::Instant::now();
            writeln!(buf, "[{:>10} us {:<5} {}] {}", now.as_micros(), record.level(), record.target(), record.args())
        })
        .init();

    let mut args = std::env::args().skip(1);
    let scenario_path = PathBuf::from(args.next().ok_or_else(|| anyhow!(USAGE))?);
    let config_path = args.next().map(PathBuf::from);

    info!("Loading scenario {}", scenario_path.display());
    let mut scenario = load_scenario(&scenario_path)?;
    if let Some(path) = config_path {
        scenario.receiver_config = ReceiverConfig::load(&path)
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("Invalid receiver configuration {}", path.display()))?;
    }

    let summary = run_scenario(&scenario)?;
    summary.log();
    Ok(())
}
