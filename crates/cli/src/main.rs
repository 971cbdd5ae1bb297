use clap::Parser;
use yks_cli::{config, run, Cli};

fn main() {
    config::init_tracing();
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
