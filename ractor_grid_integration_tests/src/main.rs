// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::env;

mod tests;

use clap::Parser;

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run a test-case directly
    #[command(subcommand)]
    Test(tests::TestCase),
}

/// Test-suite runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

// MAIN //
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let args = Args::parse();

    // if it's not set, set the log level to debug
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "debug");
    }
    env_logger::builder().format_timestamp_millis().init();

    let code = match args.command {
        Command::Test(case) => {
            tokio::select! {
                code = tests::run(case) => code,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("CTRL-C pressed, exiting test");
                    0
                }
            }
        }
    };
    log::info!("Test exiting with code {code}");
    std::process::exit(code);
}
