use anyhow::Result;
use clap::Parser;
use quack_ocr::cli;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args) {
        // Logging may not be up yet when config loading fails.
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}
