use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::args::{OutputFormat, DEFAULT_SERVE_ADDR};
use crate::cli::{FlightsArgs, QueryArgs, ServeArgs};
use crate::es::EsConfig;

/// Top-level representation of `.flightquery/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchSection>,

    #[serde(default)]
    pub query: Option<QuerySection>,

    #[serde(default)]
    pub serve: Option<ServeSection>,

    #[serde(default)]
    pub http: Option<HttpSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ElasticsearchSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub insecure: Option<bool>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
    #[serde(default)]
    pub ready_poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuerySection {
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub no_server: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServeSection {
    #[serde(default)]
    pub addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HttpSection {
    #[serde(default)]
    pub server_url: Option<String>,
}

/// Discover and load a project-local `.flightquery/config.toml` (or
/// `.flightquery/flightquery.toml`) starting from the current working
/// directory and walking up parent directories.
pub fn load_cli_config() -> Result<Option<CliConfig>> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let config_path = find_project_config(&cwd);

    let Some(path) = config_path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse TOML config at {}", path.display()))?;

    Ok(Some(config))
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);

    while let Some(current) = dir {
        let project_dir = current.join(".flightquery");
        let config_toml = project_dir.join("config.toml");
        if config_toml.is_file() {
            return Some(config_toml);
        }

        let named_toml = project_dir.join("flightquery.toml");
        if named_toml.is_file() {
            return Some(named_toml);
        }

        dir = current.parent();
    }

    None
}

/// Connection settings from the config file layered over defaults.
pub fn es_config_defaults(config: Option<&CliConfig>) -> EsConfig {
    let mut es = EsConfig::default();
    let Some(section) = config.and_then(|c| c.elasticsearch.as_ref()) else {
        return es;
    };

    if let Some(url) = &section.url {
        es.url = url.clone();
    }
    if let Some(username) = &section.username {
        es.username = username.clone();
    }
    if let Some(password) = &section.password {
        es.password = Some(password.clone());
    }
    if let Some(index) = &section.index {
        es.index = index.clone();
    }
    if let Some(insecure) = section.insecure {
        es.insecure = insecure;
    }
    if let Some(timeout) = section.request_timeout_secs {
        es.request_timeout_secs = timeout;
    }
    if let Some(timeout) = section.ready_timeout_secs {
        es.ready_timeout_secs = timeout;
    }
    if let Some(interval) = section.ready_poll_interval_secs {
        es.ready_poll_interval_secs = interval;
    }

    es
}

pub fn apply_query_config_defaults(config: &CliConfig, args: &mut QueryArgs) {
    if args.size.is_none() {
        if let Some(size) = config.query.as_ref().and_then(|q| q.size) {
            args.size = Some(size);
        }
    }
    apply_output_defaults(config, &mut args.output);
}

pub fn apply_flights_config_defaults(config: &CliConfig, args: &mut FlightsArgs) {
    apply_output_defaults(config, &mut args.output);
}

fn apply_output_defaults(config: &CliConfig, output: &mut crate::cli::args::OutputArgs) {
    if let Some(query) = &config.query {
        if output.format.is_none() {
            output.format = query.format;
        }

        if output.server.is_none() {
            if let Some(server) = &query.server {
                output.server = Some(server.clone());
            }
        }

        if !output.no_server {
            if let Some(true) = query.no_server {
                output.no_server = true;
            }
        }
    }

    // If there is no per-query server, fall back to a global HTTP
    // server URL when present.
    if output.server.is_none() {
        if let Some(url) = config.http.as_ref().and_then(|h| h.server_url.as_ref()) {
            output.server = Some(url.clone());
        }
    }
}

pub fn apply_serve_config_defaults(config: &CliConfig, args: &mut ServeArgs) {
    if let Some(serve) = &config.serve {
        if args.addr == DEFAULT_SERVE_ADDR {
            if let Some(addr) = &serve.addr {
                args.addr = addr.clone();
            }
        }
    }
}
