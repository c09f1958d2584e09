use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::es::EsConfig;
use crate::models::{BoolQuery, Query};
use crate::search::flights::{FlightQuery, DEFAULT_LONG_DISTANCE_KM, DEFAULT_MIN_DELAY};
use crate::search::query::{
    parse_field_value, parse_query_kind, parse_sort_order, parse_where, AggsType, QueryKind,
    QueryParams, DEFAULT_SIZE,
};

/// Default bind address for `flightquery serve`.
pub const DEFAULT_SERVE_ADDR: &str = "127.0.0.1:5000";

/// Top-level CLI entrypoint for `flightquery`.
#[derive(Parser, Debug)]
#[command(
    name = "flightquery",
    about = "Query the Kibana sample flights index in Elasticsearch",
    author = "flightquery developers",
    subcommand_required = false,
    arg_required_else_help = false
)]
pub struct Cli {
    /// Print the JSON schema version used for `--format=json` output
    /// and exit.
    #[arg(long = "schema-version")]
    pub schema_version: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and run a query of a given kind.
    Query(QueryArgs),
    /// Run one of the predefined flight queries.
    Flights(FlightsArgs),
    /// Wait for Elasticsearch and create the flights index.
    Setup,
    /// Bulk load newline-delimited JSON flight documents.
    Load(LoadArgs),
    /// Check whether Elasticsearch is reachable.
    Ping,
    /// Run a long-lived HTTP+JSON daemon.
    Serve(ServeArgs),
}

/// Connection options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Base URL of the Elasticsearch cluster.
    #[arg(long = "es-url", env = "ES_LOCAL_URL", global = true)]
    pub es_url: Option<String>,

    /// User for basic authentication.
    #[arg(long = "es-user", env = "ES_LOCAL_USER", global = true)]
    pub es_user: Option<String>,

    /// Password for basic authentication.
    #[arg(
        long = "es-password",
        env = "ES_LOCAL_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub es_password: Option<String>,

    /// Index to query (defaults to the Kibana sample flights index).
    #[arg(long = "index", global = true)]
    pub index: Option<String>,

    /// Seconds `setup` waits for the cluster to become reachable.
    #[arg(long = "ready-timeout", global = true)]
    pub ready_timeout_secs: Option<u64>,
}

/// Output format for query results.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Table,
    Json,
}

/// Output and routing options shared by `query` and `flights`.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output format (text, table, or json). Defaults to text unless
    /// the project config sets one.
    #[arg(long = "format", value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Print the request body instead of executing it.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    /// Optional server URL for delegating queries to a daemon.
    ///
    /// When set (either via this flag or the `FLIGHTQUERY_SERVER_URL`
    /// environment variable), the CLI sends the query to the HTTP
    /// server instead of contacting Elasticsearch directly. Use
    /// `--no-server` to override this and force direct execution.
    #[arg(long = "server", env = "FLIGHTQUERY_SERVER_URL", global = true)]
    pub server: Option<String>,

    /// Disable use of any configured server and query directly.
    #[arg(long = "no-server", global = true)]
    pub no_server: bool,
}

impl OutputArgs {
    /// Format after config layering, falling back to text.
    pub fn output_format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }
}

/// Arguments specific to the `query` subcommand.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Query kind: match_all, term, match, range, bool, aggs, or sort.
    pub kind: String,

    /// Field the query (or aggregation, or sort) applies to.
    #[arg(long = "field")]
    pub field: Option<String>,

    /// Value for term and match queries.
    #[arg(long = "value", allow_hyphen_values = true)]
    pub value: Option<String>,

    /// Exclusive lower bound for range queries.
    #[arg(long = "gt", allow_negative_numbers = true)]
    pub gt: Option<String>,

    /// Inclusive lower bound for range queries.
    #[arg(long = "gte", allow_negative_numbers = true)]
    pub gte: Option<String>,

    /// Exclusive upper bound for range queries.
    #[arg(long = "lt", allow_negative_numbers = true)]
    pub lt: Option<String>,

    /// Inclusive upper bound for range queries.
    #[arg(long = "lte", allow_negative_numbers = true)]
    pub lte: Option<String>,

    /// Bool `must` clause as a JSON query (repeatable).
    #[arg(long = "must")]
    pub must: Vec<String>,

    /// Bool `must_not` clause as a JSON query (repeatable).
    #[arg(long = "must-not")]
    pub must_not: Vec<String>,

    /// Bool `should` clause as a JSON query (repeatable).
    #[arg(long = "should")]
    pub should: Vec<String>,

    /// Bool `filter` clause as a JSON query (repeatable).
    #[arg(long = "filter")]
    pub filter: Vec<String>,

    /// Filter expression merged into a bool query, e.g.
    /// `Carrier:ES-Air AvgTicketPrice:200..400 -Cancelled:true`.
    #[arg(long = "where")]
    pub where_expr: Option<String>,

    /// Aggregation type for `aggs` queries (terms or avg).
    #[arg(long = "aggs-type")]
    pub aggs_type: Option<String>,

    /// Field averaged per bucket for `terms` aggregations.
    #[arg(long = "avg-field")]
    pub avg_field: Option<String>,

    /// Sort order for `sort` queries (asc or desc).
    #[arg(long = "order")]
    pub order: Option<String>,

    /// Number of hits to return.
    #[arg(long = "size")]
    pub size: Option<u32>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments specific to the `flights` subcommand.
#[derive(Args, Debug, Clone)]
pub struct FlightsArgs {
    #[command(subcommand)]
    pub entry: FlightsCommand,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Predefined flight queries.
#[derive(Subcommand, Debug, Clone)]
pub enum FlightsCommand {
    /// Retrieve all flights.
    All {
        #[arg(long = "size")]
        size: Option<u32>,
    },
    /// Flights operated by a carrier (exact match).
    ByCarrier {
        carrier: String,
        #[arg(long = "size", default_value_t = DEFAULT_SIZE)]
        size: u32,
    },
    /// Flights departing from a city (full-text match).
    ByOriginCity {
        city: String,
        #[arg(long = "size", default_value_t = DEFAULT_SIZE)]
        size: u32,
    },
    /// Flights with an average ticket price within a range.
    PriceRange {
        min_price: f64,
        max_price: f64,
        #[arg(long = "size", default_value_t = DEFAULT_SIZE)]
        size: u32,
    },
    /// Average ticket price per carrier.
    AvgPricePerCarrier,
    /// Flights longer than a distance in kilometres.
    LongDistance {
        #[arg(long = "min-km", default_value_t = DEFAULT_LONG_DISTANCE_KM)]
        min_km: f64,
    },
    /// Flights at an exact timestamp (YYYY-MM-DD[THH:MM:SS]).
    OnDate { date: String },
    /// Flights within a date range (inclusive).
    DateRange { from: String, to: String },
    /// Delayed flights summarised per carrier and delay type.
    DelayAnalysis {
        #[arg(
            long = "min-delay",
            default_value_t = DEFAULT_MIN_DELAY,
            allow_negative_numbers = true
        )]
        min_delay: i64,
    },
    /// Cancelled flights grouped by origin weather.
    CancelledByWeather,
    /// Most expensive flights first.
    TopPrices {
        #[arg(long = "size", default_value_t = DEFAULT_SIZE)]
        size: u32,
    },
}

impl FlightsCommand {
    pub fn to_model(&self) -> FlightQuery {
        match self.clone() {
            FlightsCommand::All { size } => FlightQuery::All { size },
            FlightsCommand::ByCarrier { carrier, size } => FlightQuery::ByCarrier { carrier, size },
            FlightsCommand::ByOriginCity { city, size } => FlightQuery::ByOriginCity { city, size },
            FlightsCommand::PriceRange {
                min_price,
                max_price,
                size,
            } => FlightQuery::PriceRange {
                min_price,
                max_price,
                size,
            },
            FlightsCommand::AvgPricePerCarrier => FlightQuery::AvgPricePerCarrier,
            FlightsCommand::LongDistance { min_km } => FlightQuery::LongDistance { min_km },
            FlightsCommand::OnDate { date } => FlightQuery::OnDate { date },
            FlightsCommand::DateRange { from, to } => FlightQuery::DateRange { from, to },
            FlightsCommand::DelayAnalysis { min_delay } => FlightQuery::DelayAnalysis { min_delay },
            FlightsCommand::CancelledByWeather => FlightQuery::CancelledByWeather,
            FlightsCommand::TopPrices { size } => FlightQuery::TopPrices { size },
        }
    }
}

/// Arguments specific to the `load` subcommand.
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Newline-delimited JSON file with one flight document per line.
    pub file: PathBuf,

    /// Create the index with the flights mapping before loading.
    #[arg(long = "create-index")]
    pub create_index: bool,
}

/// Arguments specific to the `serve` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to, e.g. "127.0.0.1:5000".
    #[arg(long = "addr", default_value = DEFAULT_SERVE_ADDR)]
    pub addr: String,

    /// Wait for Elasticsearch to become reachable before serving.
    #[arg(long = "wait")]
    pub wait: bool,
}

/// Build an `EsConfig` from connection flags layered over `base`
/// (defaults or the project config file).
pub fn es_config_from_args(args: &ConnectionArgs, base: EsConfig) -> EsConfig {
    let mut config = base;
    if let Some(url) = &args.es_url {
        config.url = url.clone();
    }
    if let Some(user) = &args.es_user {
        config.username = user.clone();
    }
    if let Some(password) = &args.es_password {
        config.password = Some(password.clone());
    }
    if let Some(index) = &args.index {
        config.index = index.clone();
    }
    if let Some(timeout) = args.ready_timeout_secs {
        config.ready_timeout_secs = timeout;
    }
    config
}

fn parse_json_queries(flag: &str, raw: &[String]) -> Result<Option<Vec<Query>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.iter()
        .map(|json| {
            serde_json::from_str::<Query>(json)
                .with_context(|| format!("invalid JSON query for --{flag}: {json}"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn extend_clauses(target: &mut Option<Vec<Query>>, extra: Vec<Query>) {
    if !extra.is_empty() {
        target.get_or_insert_with(Vec::new).extend(extra);
    }
}

/// Translate `query` arguments into a kind and builder parameters.
pub fn query_params_from_args(args: &QueryArgs) -> Result<(QueryKind, QueryParams)> {
    let kind = parse_query_kind(&args.kind)?;

    let mut params = QueryParams {
        field: args.field.clone(),
        value: args.value.as_deref().map(parse_field_value),
        gt: args.gt.as_deref().map(parse_field_value),
        gte: args.gte.as_deref().map(parse_field_value),
        lt: args.lt.as_deref().map(parse_field_value),
        lte: args.lte.as_deref().map(parse_field_value),
        must: parse_json_queries("must", &args.must)?,
        must_not: parse_json_queries("must-not", &args.must_not)?,
        should: parse_json_queries("should", &args.should)?,
        filter: parse_json_queries("filter", &args.filter)?,
        aggs_type: args
            .aggs_type
            .as_deref()
            .map(str::parse::<AggsType>)
            .transpose()?,
        avg_field: args.avg_field.clone(),
        order: args.order.as_deref().map(parse_sort_order).transpose()?,
        size: args.size,
    };

    if let Some(expr) = &args.where_expr {
        if kind != QueryKind::Bool {
            bail!("--where can only be used with the bool query kind");
        }
        match parse_where(expr)? {
            Some(Query::Bool(BoolQuery {
                must,
                must_not,
                should,
                filter,
            })) => {
                extend_clauses(&mut params.must, must);
                extend_clauses(&mut params.must_not, must_not);
                extend_clauses(&mut params.should, should);
                extend_clauses(&mut params.filter, filter);
            }
            Some(Query::Match { field, value }) => {
                extend_clauses(&mut params.must, vec![Query::Match { field, value }]);
            }
            Some(other) => extend_clauses(&mut params.filter, vec![other]),
            None => {}
        }
    }

    Ok((kind, params))
}
