use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

/// Describe images with a local vision model, then rename them or embed the
/// description as XMP metadata.
#[derive(Parser, Debug)]
#[command(name = "image-describer")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Check that the model service is reachable and exit
    #[arg(long)]
    pub test_connection: bool,

    /// List models installed on the model service and exit
    #[arg(long)]
    pub list_models: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rename images after their generated description
    Rename(RenameArgs),

    /// Store descriptions in the database and embed them as XMP
    Describe(DescribeArgs),

    /// Write a default configuration file
    InitConfig {
        /// Where to write it
        #[arg(value_name = "PATH", default_value = "config/app_config.yaml")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Image file or directory
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Include subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Show what would be renamed without touching any file
    #[arg(long)]
    pub dry_run: bool,

    /// Prompt sent with each image
    #[arg(long, value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Keep running and rename new images as they appear
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Directory of images (defaults to images.default_directory)
    #[arg(value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Same as the positional DIRECTORY
    #[arg(short = 'd', long = "directory", value_name = "DIR", conflicts_with = "directory")]
    pub directory_flag: Option<PathBuf>,

    /// Include subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Skip the file name clean-up pass
    #[arg(long)]
    pub no_sanitize: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Check that the model service is reachable and exit
    #[arg(long)]
    pub check_connection: bool,

    /// List installed models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Show database statistics and exit
    #[arg(long)]
    pub db_stats: bool,

    /// Prompt sent with each image
    #[arg(long, value_name = "TEXT")]
    pub prompt: Option<String>,
}

impl DescribeArgs {
    pub fn target_directory(&self, config: &AppConfig) -> PathBuf {
        self.directory
            .clone()
            .or_else(|| self.directory_flag.clone())
            .unwrap_or_else(|| config.images.default_directory.clone())
    }
}

impl Cli {
    /// Fold command line flags into the loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) {
        match &self.command {
            Some(Command::Rename(args)) => {
                if args.recursive {
                    config.processing.recursive = true;
                }
            }
            Some(Command::Describe(args)) => {
                if args.recursive {
                    config.processing.recursive = true;
                }
                if args.no_progress {
                    config.processing.progress_bar = false;
                }
            }
            _ => {}
        }
        if self.quiet {
            config.processing.progress_bar = false;
        }
    }
}
