use clap::{CommandFactory, Parser};
use env_logger::Env;
use log::info;
use moving_windows::cli::Args;
use moving_windows::error::Result;
use moving_windows::pipeline::{self, RunConfig};

fn main() -> Result<()> {
    // bare invocation prints usage and succeeds
    if std::env::args_os().len() <= 1 {
        Args::command().print_help()?;
        return Ok(());
    }

    let args = Args::parse();

    // Initialize logger
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Moving Windows ===");

    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let config = RunConfig::from_args(&args)?;
    info!(
        "Reducer {} over windows {:?}, output prefix {}",
        config.reducer, config.window_sizes, config.output_prefix
    );

    let written = pipeline::run(&config)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }

    info!("=== Done! ({} rasters written) ===", written.len());
    Ok(())
}
