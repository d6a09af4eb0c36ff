mod cli;
mod scanner;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let args: Vec<String> = std::env::args().collect();
    if cli::handle_commands(&args)? {
        return Ok(());
    }

    if let Some(unknown) = args.get(1) {
        anyhow::bail!("Unknown command {unknown:?}. Run `scanlens help` for usage.");
    }
    cli::print_usage();
    Ok(())
}
