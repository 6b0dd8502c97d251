//! # ovid-cli
//!
//! Command-line interface for the ovid storage validation workload.
//!
//! Without a subcommand, `ovid` runs the workload in a single process.
//! The `leader` subcommand orchestrates a follower fleet; the `follower`
//! subcommand serves the HTTP control endpoints and runs workloads on the
//! leader's behalf.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// The CLI talks to its user on stdout.
#![allow(clippy::print_stdout)]

pub mod args;
pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use ovid_core::observability::LogFormat;

/// A data validation tool for S3-compatible object storages.
#[derive(Debug, Parser)]
#[command(name = "ovid")]
#[command(author, version, about)]
#[command(
    long_about = "A data validation tool for S3-compatible object storages.\n\
                  If no subcommand is specified, ovid runs in the single-process mode."
)]
pub struct Cli {
    /// Workload parameters shared by the single-process and leader modes.
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// File name to save the execution context.
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,

    /// File name to load the execution context.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["bucket", "endpoint"])]
    pub load: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Workload parameters shared by the root and leader modes.
#[derive(Debug, Clone, clap::Args)]
pub struct WorkloadArgs {
    /// The maximum number of objects per process.
    #[arg(long = "num_obj", default_value_t = 10)]
    pub num_obj: usize,

    /// The number of workers per process.
    #[arg(long = "num_worker", default_value_t = 1)]
    pub num_worker: usize,

    /// The object size, like "8k", or a range like "4k-2m".
    /// Only "k", "m" and "g" are allowed as units.
    #[arg(long, default_value = "4k")]
    pub size: String,

    /// Time duration to run the workload, like "3s". 0 runs infinitely.
    #[arg(long, default_value = "3s")]
    pub time: String,

    /// The name list of the buckets, e.g. "bucket1,bucket2".
    #[arg(long, value_delimiter = ',')]
    pub bucket: Vec<String>,

    /// The ratio of put, get, delete and list operations, e.g. "2,3,1,1".
    #[arg(long = "ope_ratio", default_value = "1,1,1,0")]
    pub ope_ratio: String,

    /// The endpoint URL and TCP port, e.g. "http://127.0.0.1:9000".
    #[arg(long, default_value = "")]
    pub endpoint: String,

    /// The object size threshold to switch to the multipart upload.
    /// Only "k", "m" and "g" are allowed as units.
    #[arg(long = "multipart_thresh", default_value = "100m")]
    pub multipart_thresh: String,

    /// File name of an extra CA certificate.
    #[arg(long, value_name = "PATH")]
    pub cacert: Option<PathBuf>,

    /// Log format.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Plain)]
    pub log: LogFormatArg,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the leader of the multi-process mode.
    Leader(LeaderArgs),
    /// Start a follower of the multi-process mode.
    Follower(FollowerArgs),
}

/// Arguments of the `leader` subcommand.
#[derive(Debug, clap::Args)]
pub struct LeaderArgs {
    /// Workload parameters distributed to the followers.
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// The follower list, e.g. "http://localhost:8080,http://localhost:8081".
    #[arg(long = "follower_list", value_delimiter = ',')]
    pub follower_list: Vec<String>,

    /// Config file in JSON format with a "FollowerList" entry.
    #[arg(long, value_name = "PATH", conflicts_with = "follower_list")]
    pub config: Option<PathBuf>,
}

/// Arguments of the `follower` subcommand.
#[derive(Debug, clap::Args)]
pub struct FollowerArgs {
    /// TCP port number to which the follower listens.
    #[arg(long = "follower_port", value_name = "PORT")]
    pub follower_port: u16,

    /// File name of an extra CA certificate.
    #[arg(long, value_name = "PATH")]
    pub cacert: Option<PathBuf>,

    /// Log format.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Plain)]
    pub log: LogFormatArg,
}

/// Log format flag value.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable plain text.
    #[default]
    Plain,
    /// JSON structured logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Plain => Self::Plain,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_flags_parse() {
        let cli = Cli::parse_from([
            "ovid",
            "--num_obj",
            "128",
            "--num_worker",
            "4",
            "--size",
            "4k-2m",
            "--time",
            "10s",
            "--bucket",
            "b1,b2",
            "--ope_ratio",
            "2,3,1,1",
            "--endpoint",
            "http://127.0.0.1:9000",
            "--multipart_thresh",
            "8m",
            "--log",
            "json",
        ]);
        assert_eq!(cli.workload.num_obj, 128);
        assert_eq!(cli.workload.num_worker, 4);
        assert_eq!(cli.workload.bucket, vec!["b1", "b2"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.workload.log, LogFormatArg::Json));
    }

    #[test]
    fn load_conflicts_with_bucket_and_endpoint() {
        assert!(Cli::try_parse_from(["ovid", "--load", "ctx.json", "--bucket", "b1"]).is_err());
        assert!(
            Cli::try_parse_from(["ovid", "--load", "ctx.json", "--endpoint", "http://x"]).is_err()
        );
        assert!(Cli::try_parse_from(["ovid", "--load", "ctx.json"]).is_ok());
    }

    #[test]
    fn leader_rejects_follower_list_plus_config() {
        assert!(Cli::try_parse_from([
            "ovid",
            "leader",
            "--follower_list",
            "http://localhost:8080",
            "--config",
            "leader.json",
        ])
        .is_err());
    }

    #[test]
    fn follower_requires_a_port() {
        assert!(Cli::try_parse_from(["ovid", "follower"]).is_err());
        let cli = Cli::parse_from(["ovid", "follower", "--follower_port", "8080"]);
        match cli.command {
            Some(Commands::Follower(args)) => assert_eq!(args.follower_port, 8080),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
