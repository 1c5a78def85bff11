use clap::Parser;
use flowedit::cli::commands::Cli;
use flowedit::cli::handlers;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.project_dir.as_deref());

    if let Err(e) = handlers::dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// FLOWEDIT_LOG wins; otherwise the project's `[log] filter`, otherwise "warn".
fn init_logging(project_dir: Option<&str>) {
    let filter = match std::env::var("FLOWEDIT_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => {
            let dir = project_dir
                .map(std::path::PathBuf::from)
                .or_else(|| std::env::current_dir().ok());
            let configured = dir
                .and_then(|d| flowedit::io::config_io::read_config(&d).ok())
                .map(|c| c.log.filter)
                .unwrap_or_else(|| "warn".to_string());
            EnvFilter::new(configured)
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
