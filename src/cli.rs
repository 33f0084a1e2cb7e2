//! Command-line interface, built on clap.
//!
//! Defines [`Cli`] with the [`Command`] subcommands (run, inspect, summarize,
//! demo) and the global flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::store::ElementFamily;

/// gridwatch — grid resource status inspection and matching throttle.
#[derive(Debug, Parser)]
#[command(name = "gridwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (default: ./gridwatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug-level output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Element family argument, mapped to [`ElementFamily`] internally.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FamilyArg {
    /// Whole grid sites.
    Site,
    /// Resources attached to a site (storage, computing).
    Resource,
    /// Individual nodes of a resource.
    Node,
}

impl From<FamilyArg> for ElementFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Site => ElementFamily::Site,
            FamilyArg::Resource => ElementFamily::Resource,
            FamilyArg::Node => ElementFamily::Node,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the inspection and summarization agents until interrupted.
    Run,

    /// Run a single inspection cycle and exit.
    Inspect {
        /// Restrict the cycle to one element family.
        #[arg(long)]
        family: Option<FamilyArg>,
    },

    /// Run a single log-summarization pass and exit.
    Summarize,

    /// Run the embedded end-to-end demonstration.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_inspect_with_family() {
        let cli = Cli::parse_from(["gridwatch", "inspect", "--family", "resource"]);
        match cli.command {
            Command::Inspect { family } => {
                assert!(matches!(family, Some(FamilyArg::Resource)));
            }
            _ => panic!("expected Inspect command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "gridwatch",
            "--config",
            "/etc/gridwatch.toml",
            "--verbose",
            "run",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config.unwrap(), PathBuf::from("/etc/gridwatch.toml"));
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn family_arg_maps_to_element_family() {
        assert_eq!(ElementFamily::from(FamilyArg::Site), ElementFamily::Site);
        assert_eq!(ElementFamily::from(FamilyArg::Node), ElementFamily::Node);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
