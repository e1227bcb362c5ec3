use std::process::ExitCode;

use clap::Parser;

use stickerfe::cli::{self, CliArgs};
use stickerfe::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);

    cli::run(args)
}
