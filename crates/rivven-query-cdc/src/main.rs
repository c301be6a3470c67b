//! rivven-query-cdc - Publish BigQuery query results as CDC events
//!
//! # Usage
//!
//! ```bash
//! # Publish every row of a query as a DELETE event
//! rivven-query-cdc -job_project_id=billing \
//!     -query="SELECT id FROM ds.deleted_users" \
//!     -topic=projects/target/topics/users-cdc \
//!     -operation=DELETE
//!
//! # Serve the same operation over HTTP on :8080
//! rivven-query-cdc -webserver
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::info;

use rivven_query_cdc::gcp::{BigQueryEngine, PubSubBroker};
use rivven_query_cdc::{telemetry, GcpConfig, Pipeline, QueryCdcServer, RunMode};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() <= 1 {
        println!("No parameters provided");
        print_usage();
        return Ok(ExitCode::FAILURE);
    }

    let cli = Cli::parse_from(cli::normalize_args(args));
    telemetry::init_logging(cli.verbose);

    let config = cli.into_config();
    let pipeline = gcp_pipeline(&config.gcp);

    match config.mode {
        RunMode::Webserver(server_config) => {
            let bind = server_config.bind;
            QueryCdcServer::new(pipeline, server_config)
                .run()
                .await
                .with_context(|| format!("Webserver on {} failed", bind))?;
            Ok(ExitCode::SUCCESS)
        }
        RunMode::OneShot(request) => match pipeline.run(&request).await {
            Ok(summary) => {
                info!(rows_published = summary.rows_published, "Done");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                println!("process query: {}", e);
                print_usage();
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

fn gcp_pipeline(gcp: &GcpConfig) -> Pipeline {
    Pipeline::new(
        Arc::new(BigQueryEngine::new(gcp.clone())),
        Arc::new(PubSubBroker::new(gcp.clone())),
    )
}

fn print_usage() {
    println!();
    let _ = Cli::command().print_help();
}
