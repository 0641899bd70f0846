use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ckpt", about = "Inspect legacy model checkpoints", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with loader settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LayoutArg {
    Raw,
    SizePrefixed,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report the container format of each file
    Detect(DetectArgs),
    /// Load a checkpoint and list its tensors
    Inspect(InspectArgs),
    /// Load a checkpoint and list its storages
    Storages(StoragesArgs),
}

#[derive(Args)]
pub struct DetectArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct LoadArgs {
    pub path: PathBuf,
    /// Override the configured storage block layout
    #[arg(long)]
    pub block_layout: Option<LayoutArg>,
    /// Compare recorded module source against the files on disk
    #[arg(long)]
    pub check_source: bool,
    /// Fail instead of warning when module source has changed
    #[arg(long, requires = "check_source")]
    pub strict_source: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub load: LoadArgs,
}

#[derive(Args)]
pub struct StoragesArgs {
    #[command(flatten)]
    pub load: LoadArgs,
    /// Print a BLAKE3 digest of each storage payload
    #[arg(long)]
    pub digest: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detect_many() {
        let cli = Cli::try_parse_from(["ckpt", "detect", "a.pt", "b.pt"]).unwrap();
        if let Command::Detect(args) = cli.command {
            assert_eq!(args.paths, vec![PathBuf::from("a.pt"), PathBuf::from("b.pt")]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn detect_needs_a_path() {
        assert!(Cli::try_parse_from(["ckpt", "detect"]).is_err());
    }

    #[test]
    fn parse_inspect_json() {
        let cli = Cli::try_parse_from(["ckpt", "inspect", "m.pt", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        if let Command::Inspect(args) = cli.command {
            assert_eq!(args.load.path, PathBuf::from("m.pt"));
            assert!(args.load.block_layout.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_storages_options() {
        let cli = Cli::try_parse_from([
            "ckpt",
            "storages",
            "m.pt",
            "--digest",
            "--block-layout",
            "size-prefixed",
            "--config",
            "load.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("load.toml")));
        if let Command::Storages(args) = cli.command {
            assert!(args.digest);
            assert_eq!(args.load.block_layout, Some(LayoutArg::SizePrefixed));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn strict_source_requires_check_source() {
        assert!(Cli::try_parse_from(["ckpt", "inspect", "m.pt", "--strict-source"]).is_err());
        assert!(Cli::try_parse_from(["ckpt", "inspect", "m.pt", "--check-source", "--strict-source"]).is_ok());
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["ckpt", "-v", "detect", "x"]).unwrap();
        assert!(cli.verbose);
    }
}
