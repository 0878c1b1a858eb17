/// Routine CLI
///
/// Runs the bundled sample scenario and inspects engine configuration
/// without embedding the engine in a host application.
use routine_core::cli;

fn main() {
    init_tracing();
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
