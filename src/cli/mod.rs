use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{debug, warn};

use crate::es::{read_json_lines, EsClient, EsConfig, IndexStatus};
use crate::models::{FormattedResults, SearchRequest, RESULT_SCHEMA_VERSION};
use crate::search::query::build_query;
use crate::server;

mod args;
mod config;
mod format;
mod http_backend;

pub use args::{
    Cli, Commands, ConnectionArgs, FlightsArgs, FlightsCommand, LoadArgs, OutputArgs,
    OutputFormat, QueryArgs, ServeArgs,
};

use config::{
    apply_flights_config_defaults, apply_query_config_defaults, apply_serve_config_defaults,
    es_config_defaults, load_cli_config,
};
use http_backend::HttpQueryBackend;

/// Entry point for the CLI binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.schema_version {
        println!("Result JSON schema version: {}", RESULT_SCHEMA_VERSION);
        return Ok(());
    }

    let cli_config = load_cli_config()?;
    let es_config = args::es_config_from_args(&cli.connection, es_config_defaults(cli_config.as_ref()));

    match cli.command {
        Some(Commands::Query(mut query_args)) => {
            if let Some(ref config) = cli_config {
                apply_query_config_defaults(config, &mut query_args);
            }

            let (kind, params) = args::query_params_from_args(&query_args)?;
            let output = &query_args.output;
            let title = format!("{} query", kind.as_str());

            if output.dry_run {
                let request = build_query(kind, params)?;
                return print_request(&request);
            }

            let results = if let Some(server_url) =
                effective_server_url(output.server.as_deref(), output.no_server)
            {
                let backend = HttpQueryBackend::new(server_url)?;
                backend.query(kind, params)?
            } else {
                let request = build_query(kind, params)?;
                execute_direct(es_config, &request)?
            };

            print_results(output.output_format(), &title, &results)
        }
        Some(Commands::Flights(mut flights_args)) => {
            if let Some(ref config) = cli_config {
                apply_flights_config_defaults(config, &mut flights_args);
            }

            let entry = flights_args.entry.to_model();
            let request = entry.to_request()?;
            let output = &flights_args.output;

            if output.dry_run {
                return print_request(&request);
            }

            let results = if let Some(server_url) =
                effective_server_url(output.server.as_deref(), output.no_server)
            {
                let backend = HttpQueryBackend::new(server_url)?;
                backend.flights(&entry)?
            } else {
                execute_direct(es_config, &request)?
            };

            print_results(output.output_format(), &entry.title(), &results)
        }
        Some(Commands::Setup) => {
            let status = block_on(async move {
                let client = EsClient::new(es_config)?;
                client.wait_until_ready().await?;
                client.create_index().await
            })?;

            match status {
                IndexStatus::Created => println!("Created index"),
                IndexStatus::Exists => println!("Index already exists"),
            }
            Ok(())
        }
        Some(Commands::Load(load_args)) => {
            let file = File::open(&load_args.file)
                .with_context(|| format!("failed to open {}", load_args.file.display()))?;
            let documents = read_json_lines(BufReader::new(file))
                .with_context(|| format!("failed to read {}", load_args.file.display()))?;
            if documents.is_empty() {
                bail!("no documents found in {}", load_args.file.display());
            }

            let create_index = load_args.create_index;
            let summary = block_on(async move {
                let client = EsClient::new(es_config)?;
                if create_index {
                    client.create_index().await?;
                }
                client.bulk_load(&documents).await
            })?;

            println!(
                "Indexed {} documents ({} failed)",
                summary.indexed, summary.failed
            );
            for reason in &summary.errors {
                println!("  error: {reason}");
            }
            if summary.failed > 0 && summary.indexed == 0 {
                bail!("bulk load failed for every document");
            }
            Ok(())
        }
        Some(Commands::Ping) => {
            let url = es_config.url.clone();
            let reachable = block_on(async move {
                let client = EsClient::new(es_config)?;
                client.ping().await
            });

            match reachable {
                Ok(true) => {
                    println!("Elasticsearch at {url} is reachable");
                    Ok(())
                }
                Ok(false) => bail!("Elasticsearch at {url} answered but is not healthy"),
                Err(err) => Err(err),
            }
        }
        Some(Commands::Serve(mut serve_args)) => {
            if let Some(ref config) = cli_config {
                apply_serve_config_defaults(config, &mut serve_args);
            }

            let addr: SocketAddr = serve_args.addr.parse()?;
            println!("Starting flightquery HTTP server on http://{addr}");

            let wait = serve_args.wait;
            block_on(async move {
                let client = EsClient::new(es_config)?;
                if wait {
                    client.wait_until_ready().await?;
                } else if let Err(err) = client.ping().await {
                    warn!("Elasticsearch is not reachable yet: {err}");
                }
                server::run(addr, client).await
            })
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn block_on<F, T>(future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(future)
}

fn execute_direct(es_config: EsConfig, request: &SearchRequest) -> Result<FormattedResults> {
    debug!(index = %es_config.index, "querying Elasticsearch at {}", es_config.url);
    block_on(async move {
        let client = EsClient::new(es_config)?;
        client.execute(request).await
    })
}

fn print_request(request: &SearchRequest) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(request)?);
    Ok(())
}

fn print_results(format: OutputFormat, title: &str, results: &FormattedResults) -> Result<()> {
    match format {
        OutputFormat::Text => format::print_text(title, results),
        OutputFormat::Table => format::print_table(results),
        OutputFormat::Json => {
            serde_json::to_writer(std::io::stdout(), results)?;
            println!();
            Ok(())
        }
    }
}

fn effective_server_url(server_flag: Option<&str>, no_server: bool) -> Option<String> {
    if no_server {
        None
    } else {
        server_flag.map(|s| s.to_string())
    }
}
