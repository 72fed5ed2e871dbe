use crate::helpers;
use crate::{GlobalConfiguration, Subcommand};
use anyhow::Result;
use clap::Parser;
use dustrt::comm::MessageContext;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Performs the simulations in the specified simulation files.
#[derive(Parser)]
pub struct Opts {
    /// Number of simulations to perform in parallel.
    #[arg(default_value_t = 1, long, short = 's', value_name = "SIMULATIONS")]
    simulations: usize,
    /// Number of threads per simulation; defaults to the number of
    /// logical cores.
    #[arg(default_value_t = 0, long, short = 't', value_name = "THREADS")]
    threads: usize,
    /// Resolve input/output paths relative to each simulation file.
    #[arg(long, short = 'k')]
    relative: bool,
    /// Directory containing the input files.
    #[arg(long, short = 'i', value_name = "DIR")]
    input: Option<PathBuf>,
    /// Directory receiving the output files.
    #[arg(long, short = 'o', value_name = "DIR")]
    output: Option<PathBuf>,
    /// Recursively descend into directories matching the pattern.
    #[arg(long, short = 'r')]
    recursive: bool,
    /// Simulation file patterns; the file name part may carry wildcards.
    #[arg(required = true, value_name = "FILE-PATTERN")]
    patterns: Vec<String>,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration, _comm: &MessageContext) -> Result<ExitCode> {
        helpers::init_logging(cfg.brief || self.simulations > 1);

        let mut files = Vec::new();
        for pattern in &self.patterns {
            files.extend(helpers::expand_pattern(pattern, self.recursive)?);
        }
        log::info!("Performing {} simulation(s)...", files.len());

        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let workers = self.simulations.max(1).min(files.len().max(1));
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(file) = files.get(index) else { break };
                    if let Err(err) = self.perform(file, cfg) {
                        log::error!("Simulation {} failed: {err}", file.display());
                        failed.store(true, Ordering::Relaxed);
                    }
                });
            }
        });

        Ok(if failed.into_inner() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

impl Opts {
    fn perform(&self, file: &std::path::Path, cfg: &GlobalConfiguration) -> Result<()> {
        log::info!("Constructing simulation from {}...", file.display());
        let paths = helpers::paths_for(
            file,
            cfg,
            self.input.as_deref(),
            self.output.as_deref(),
            self.relative,
        );
        let mut simulation = dustrt::config::load_simulation(file, paths)?;
        simulation.set_thread_count(self.threads);
        simulation.setup_and_run()?;
        log::info!("Finished simulation {}", file.display());
        Ok(())
    }
}
