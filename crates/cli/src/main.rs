use std::process::ExitCode;

use crossterm::terminal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod console;
mod context_layers;

fn main() -> ExitCode {
    let matches = commands::build_cli().get_matches();
    let level = matches.get_one::<String>("log-level").map(String::as_str).unwrap_or("warn");
    init_tracing(level);

    // Raw mode swallows Ctrl-C as a key press; this covers line prompts and
    // long running steps.
    if let Err(error) = ctrlc::set_handler(|| {
        let _ = terminal::disable_raw_mode();
        eprintln!("\naborted");
        std::process::exit(0);
    }) {
        warn!(%error, "failed to install the interrupt handler");
    }

    match commands::dispatch(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
