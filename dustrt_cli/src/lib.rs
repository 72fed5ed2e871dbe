#![allow(clippy::missing_errors_doc)]
#![allow(missing_docs)]

mod fit;
mod helpers;
mod run;
pub mod signals;

use anyhow::Result;
use clap::Parser;
use dustrt::comm::MessageContext;
use enum_dispatch::enum_dispatch;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Brief console logging: only warnings and errors are shown.
    #[arg(global = true, long, short = 'b')]
    pub brief: bool,
    /// Root directory of the resource libraries.
    #[arg(global = true, long, value_name = "DIR")]
    pub resources: Option<PathBuf>,
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration, comm: &MessageContext) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Run(run::Opts),
    Fit(fit::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about,
    disable_help_subcommand = true,
    name = "dustrt",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}
