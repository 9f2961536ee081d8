use log::{error, info};
use structopt::StructOpt;

use kvstore::sim_common::{OutputFormat, run, SimOpt};
use kvstore::Result;

fn main() {
    let opt: SimOpt = SimOpt::from_args();
    match kvstore::config::log4rs::config(opt.log_level) {
        Ok(config) => if let Err(err) = log4rs::init_config(config) {
            eprintln!("unable to init logger: {}", err);
        },
        Err(err) => eprintln!("unable to configure logger: {}", err),
    }
    info!("config: {:?}", opt);
    if let Err(err) = simulate(&opt) {
        error!(target: "app::error", "simulation failed: {}", err);
        std::process::exit(1);
    }
}

fn simulate(opt: &SimOpt) -> Result<()> {
    let report = run(opt)?;
    match opt.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", report.to_text()),
    }
    Ok(())
}
