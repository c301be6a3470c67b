//! Command-line arguments
//!
//! Flags follow the single-dash style (`-query=...`, `-webserver`); both one
//! and two leading dashes are accepted.

use clap::{ArgAction, Parser};
use rivven_query_cdc::config::DEFAULT_BIND;
use rivven_query_cdc::{AppConfig, GcpConfig, OperationRequest, RunMode, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Publish the rows of a BigQuery query as CDC events to a Pub/Sub topic
#[derive(Parser, Debug)]
#[command(name = "rivven-query-cdc")]
#[command(version, about, long_about = None)]
#[command(
    override_usage = "rivven-query-cdc [-webserver|(-query=\"<query>\" -job_project_id=\"<job_project_id>\" -topic=\"<topic>\" -operation=\"<UPSERT|DELETE>\")]"
)]
pub struct Cli {
    /// Start the webserver. Other parameters are ignored
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub webserver: bool,

    /// Query to run into BigQuery. Required if -webserver is not set
    #[arg(long, default_value = "")]
    pub query: String,

    /// Topic to publish the rows to. Required if -webserver is not set
    #[arg(long, default_value = "")]
    pub topic: String,

    /// DML operation. Must be UPSERT for update/insert or DELETE for deletion.
    /// Required if -webserver is not set
    #[arg(long, default_value = "")]
    pub operation: String,

    /// Project ID of the job. Required if -webserver is not set
    #[arg(long = "job_project_id", default_value = "")]
    pub job_project_id: String,

    /// Listen address of the webserver
    #[arg(long, default_value = DEFAULT_BIND, env = "QUERY_CDC_BIND")]
    pub bind: SocketAddr,

    /// Service account key file (Application Default Credentials if unset)
    #[arg(long, env = "QUERY_CDC_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> AppConfig {
        let mode = if self.webserver {
            RunMode::Webserver(ServerConfig { bind: self.bind })
        } else {
            RunMode::OneShot(OperationRequest::new(
                self.job_project_id,
                self.query,
                self.topic,
                self.operation,
            ))
        };

        AppConfig {
            mode,
            gcp: GcpConfig {
                credentials_file: self.credentials_file,
            },
        }
    }
}

/// Rewrite `-flag` to `--flag` so single-dash long flags parse.
///
/// Short flags (`-v`) and anything after `--` are left alone.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut passthrough = false;
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || passthrough {
                return arg;
            }
            if arg == "--" {
                passthrough = true;
                return arg;
            }
            if arg.len() > 2 && arg.starts_with('-') && !arg.starts_with("--") {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}
