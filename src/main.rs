mod cli;
mod engine;
mod metrics;
mod model;
mod orchestrator;
mod text_summary;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    // Exit explicitly on both paths: resolver calls abandoned by a cancel or a
    // heartbeat timeout may still occupy the blocking pool.
    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if is_silent {
                println!("{}", e);
            } else {
                eprintln!("Error: {e:?}");
            }
            std::process::exit(1);
        }
    }
}
