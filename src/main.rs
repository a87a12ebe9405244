use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG=pwdmgr=debug for details; record values are never logged.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pwdmgr=warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = pwdmgr::app::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
