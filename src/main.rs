use tracing_subscriber::EnvFilter;

fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = bookgen::cli::Args::parse();
    let _ = dotenvy::dotenv();

    let default_level = if args.quiet {
        "error"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = bookgen::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
