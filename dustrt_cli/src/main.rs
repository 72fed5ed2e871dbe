#![allow(missing_docs)]

use clap::Parser;
use dustrt::comm::MessageContext;
use dustrt_cli::{signals, Opts, Subcommand};
use std::process::{ExitCode, Termination};

fn main() -> ExitCode {
    signals::install();
    let opts = Opts::parse();

    // the message context brackets the whole program; it is released on
    // every exit path when it goes out of scope
    let comm = match MessageContext::initialize() {
        Ok(comm) => comm,
        Err(err) => {
            eprintln!("\x1b[31mError: {err}\x1b[0m");
            return ExitCode::FAILURE;
        }
    };

    match opts.subcommand.run(&opts.configuration, &comm) {
        Ok(code) => code,
        result @ Err(_) => result.report(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command() {
        use clap::CommandFactory;
        Opts::command().debug_assert();
    }
}
