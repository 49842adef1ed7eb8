extern crate log;
extern crate pretty_env_logger;

use std::process::ExitCode;

use clap::Parser;
use fdc_attest::cli::{self, AttestArgs};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let args = AttestArgs::parse();
    ExitCode::from(cli::run(args).await)
}
