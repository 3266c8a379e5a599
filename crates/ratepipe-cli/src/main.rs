//! `ratepipe` — headless CLI entrypoint wiring `ratepipe-core::Engine` to a
//! resolved [`Config`], the two bundled worker types, stdin/stdout, and
//! `tracing-subscriber` (§10.2, §10.3 of `SPEC_FULL.md`).

mod config;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use clap::Parser;
use ratepipe_core::workers::{HttpWorker, SimulatorWorker};
use ratepipe_core::Engine;
use tokio::io::{AsyncBufRead, BufReader};

use config::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Cli::parse();

    let config = match config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal error: {e}");
            std::process::exit(1);
        }
    };

    if args.dry {
        let pretty = serde_json::to_string_pretty(&config).expect("config is serializable");
        println!("{pretty}");
        return;
    }

    let mut engine = Engine::new();
    engine.register_worker_type("http", Box::new(|| Box::new(HttpWorker::default())));
    engine.register_worker_type("simulator", Box::new(|| Box::new(SimulatorWorker::default())));

    let rate_input: Option<Box<dyn AsyncBufRead + Unpin + Send>> = if !args.quiet {
        Some(Box::new(BufReader::new(tokio::io::stdin())))
    } else {
        None
    };

    let output: Option<Arc<Mutex<Box<dyn Write + Send>>>> = if args.quiet {
        None
    } else {
        Some(Arc::new(Mutex::new(Box::new(io::stdout()) as Box<dyn Write + Send>)))
    };

    match engine.run(config, rate_input, output).await {
        Ok(stats) => {
            println!("{}", stats.render());
        }
        Err(e) => {
            eprintln!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}
