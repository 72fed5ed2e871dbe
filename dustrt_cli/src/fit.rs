use crate::helpers;
use crate::{GlobalConfiguration, Subcommand};
use anyhow::Result;
use clap::Parser;
use dustrt::comm::MessageContext;
use std::path::PathBuf;
use std::process::ExitCode;

/// Performs the fits in the specified fit files.
#[derive(Parser)]
pub struct Opts {
    /// Resolve input/output paths relative to each fit file.
    #[arg(long, short = 'k')]
    relative: bool,
    /// Directory containing the input files.
    #[arg(long, short = 'i', value_name = "DIR")]
    input: Option<PathBuf>,
    /// Directory receiving the output files.
    #[arg(long, short = 'o', value_name = "DIR")]
    output: Option<PathBuf>,
    /// Number of simulations to perform in parallel.
    #[arg(default_value_t = 1, long, short = 's', value_name = "SIMULATIONS")]
    simulations: usize,
    /// Number of threads per simulation; defaults to the number of
    /// logical cores.
    #[arg(default_value_t = 0, long, short = 't', value_name = "THREADS")]
    threads: usize,
    /// Fit files.
    #[arg(required = true, value_name = "FIT-FILE")]
    files: Vec<String>,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration, comm: &MessageContext) -> Result<ExitCode> {
        helpers::init_logging(cfg.brief);

        let mut failed = false;
        for file in &self.files {
            if let Err(err) = self.perform(file, cfg, comm) {
                log::error!("Fit {file} failed: {err}");
                failed = true;
            }
        }
        Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

impl Opts {
    fn perform(&self, file: &str, cfg: &GlobalConfiguration, comm: &MessageContext) -> Result<()> {
        let file = std::path::Path::new(file);
        log::info!("Constructing fit scheme from {}...", file.display());
        let paths = helpers::paths_for(
            file,
            cfg,
            self.input.as_deref(),
            self.output.as_deref(),
            self.relative,
        );
        // remote mode engages automatically when the message layer
        // reports more than one participant
        let mut scheme = dustrt_fit::config::load_fit_scheme(
            file,
            paths,
            self.simulations,
            self.threads,
            comm.layer().cloned(),
        )?;
        let (genome, score) = scheme.run()?;
        if !genome.is_empty() {
            log::info!("Best fit with chi-squared {score:.6e}:");
            for (label, value) in scheme.labels().iter().zip(&genome) {
                log::info!("  {label} = {value:.6e}");
            }
        }
        Ok(())
    }
}
