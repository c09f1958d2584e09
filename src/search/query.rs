//! Query construction utilities.
//!
//! Two entry points produce `SearchRequest` bodies:
//! - `build_query` assembles a request from a query kind plus loose
//!   parameters (the shape used by the CLI `query` subcommand and the
//!   `POST /v1/query` endpoint).
//! - `parse_where` turns a compact filter expression such as
//!   `Carrier:ES-Air AvgTicketPrice:200..400 -Cancelled:true` into a
//!   query:
//!   - Space-separated tokens are combined with AND.
//!   - A leading `-` negates a token (`must_not`).
//!   - `A|B` within a token is treated as OR; bare alternatives inherit
//!     the field of the first one (e.g. `Carrier:ES-Air|JetBeats`).
//!   - Values of the form `a..b`, `>x`, `>=x`, `<x`, `<=x` become range
//!     queries, `~text` becomes a full-text match, anything else is an
//!     exact term.

use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{
    flight_field_type, Aggregation, BoolQuery, FieldValue, Query, RangeBounds, SearchRequest,
    SortOrder,
};

/// Page size used when a request does not specify one.
pub const DEFAULT_SIZE: u32 = 10;

/// Name of the average sub-aggregation attached to `aggs` requests when
/// `avg_field` is provided.
pub const AVG_SUB_AGGREGATION: &str = "avg_value";

/// Kinds of request `build_query` knows how to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    MatchAll,
    Term,
    Match,
    Range,
    Bool,
    Aggs,
    Sort,
}

impl QueryKind {
    pub const ALL: [QueryKind; 7] = [
        QueryKind::MatchAll,
        QueryKind::Term,
        QueryKind::Match,
        QueryKind::Range,
        QueryKind::Bool,
        QueryKind::Aggs,
        QueryKind::Sort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::MatchAll => "match_all",
            QueryKind::Term => "term",
            QueryKind::Match => "match",
            QueryKind::Range => "range",
            QueryKind::Bool => "bool",
            QueryKind::Aggs => "aggs",
            QueryKind::Sort => "sort",
        }
    }
}

impl FromStr for QueryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_query_kind(s)
    }
}

/// Parse a query kind name. Hyphens are accepted in place of
/// underscores (`match-all`).
pub fn parse_query_kind(input: &str) -> Result<QueryKind> {
    let normalized = input.trim().to_ascii_lowercase().replace('-', "_");
    QueryKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == normalized)
        .ok_or_else(|| anyhow!("Unsupported query type: {input}"))
}

/// Parse a sort order (`asc` or `desc`, case-insensitive).
pub fn parse_sort_order(input: &str) -> Result<SortOrder> {
    match input.trim().to_ascii_lowercase().as_str() {
        "asc" => Ok(SortOrder::Asc),
        "desc" => Ok(SortOrder::Desc),
        other => bail!("invalid sort order `{other}` (expected asc or desc)"),
    }
}

/// Kind of aggregation produced by `QueryKind::Aggs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggsType {
    Terms,
    Avg,
}

impl AggsType {
    pub fn as_str(self) -> &'static str {
        match self {
            AggsType::Terms => "terms",
            AggsType::Avg => "avg",
        }
    }
}

impl FromStr for AggsType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terms" => Ok(AggsType::Terms),
            "avg" => Ok(AggsType::Avg),
            other => bail!("unsupported aggregation type `{other}` (expected terms or avg)"),
        }
    }
}

/// Loose parameters accepted by `build_query`. Which fields are
/// required depends on the query kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must: Option<Vec<Query>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_not: Option<Vec<Query>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should: Option<Vec<Query>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<Query>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggs_type: Option<AggsType>,
    /// Numeric field averaged per bucket for `terms` aggregations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

fn require_field(kind: QueryKind, params: &QueryParams) -> Result<String> {
    params
        .field
        .clone()
        .ok_or_else(|| anyhow!("{} query requires a field", kind.as_str()))
}

fn require_value(kind: QueryKind, params: &QueryParams) -> Result<FieldValue> {
    params
        .value
        .clone()
        .ok_or_else(|| anyhow!("{} query requires a value", kind.as_str()))
}

/// Build a search request of the given kind.
///
/// Every kind defaults to `DEFAULT_SIZE` hits except `aggs`, which
/// defaults to zero hits so only aggregation results come back.
pub fn build_query(kind: QueryKind, params: QueryParams) -> Result<SearchRequest> {
    let default_size = match kind {
        QueryKind::Aggs => 0,
        _ => DEFAULT_SIZE,
    };
    let size = params.size.unwrap_or(default_size);

    let request = match kind {
        QueryKind::MatchAll => SearchRequest::with_query(Query::MatchAll),
        QueryKind::Term => SearchRequest::with_query(Query::Term {
            field: require_field(kind, &params)?,
            value: require_value(kind, &params)?,
        }),
        QueryKind::Match => SearchRequest::with_query(Query::Match {
            field: require_field(kind, &params)?,
            value: require_value(kind, &params)?,
        }),
        QueryKind::Range => {
            let field = require_field(kind, &params)?;
            let bounds = RangeBounds {
                gt: params.gt,
                gte: params.gte,
                lt: params.lt,
                lte: params.lte,
            };
            if bounds.is_empty() {
                bail!("range query on `{field}` requires at least one bound");
            }
            SearchRequest::with_query(Query::range(field, bounds))
        }
        QueryKind::Bool => {
            let bool_query = BoolQuery {
                must: params.must.unwrap_or_default(),
                must_not: params.must_not.unwrap_or_default(),
                should: params.should.unwrap_or_default(),
                filter: params.filter.unwrap_or_default(),
            };
            if bool_query.is_empty() {
                bail!("bool query requires at least one of must, must_not, should, filter");
            }
            SearchRequest::with_query(Query::Bool(bool_query))
        }
        QueryKind::Aggs => {
            let aggs_type = params
                .aggs_type
                .ok_or_else(|| anyhow!("aggs query requires an aggregation type"))?;
            let field = require_field(kind, &params)?;
            let name = format!("{}_on_{}", aggs_type.as_str(), field);
            let aggregation = match aggs_type {
                AggsType::Terms => {
                    let terms = Aggregation::terms(field);
                    match params.avg_field {
                        Some(avg_field) => {
                            terms.with_sub(AVG_SUB_AGGREGATION, Aggregation::avg(avg_field))
                        }
                        None => terms,
                    }
                }
                AggsType::Avg => Aggregation::avg(field),
            };
            SearchRequest::default().aggregate(name, aggregation)
        }
        QueryKind::Sort => {
            let field = require_field(kind, &params)?;
            SearchRequest::default().sort_by(field, params.order.unwrap_or_default())
        }
    };

    Ok(request.size(size))
}

/// Interpret a raw command-line value as the most specific scalar:
/// booleans, then integers, then floats, falling back to text.
pub fn parse_field_value(raw: &str) -> FieldValue {
    match raw {
        "true" => return FieldValue::Bool(true),
        "false" => return FieldValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return FieldValue::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return FieldValue::Float(f);
        }
    }
    FieldValue::Text(raw.to_string())
}

/// Like `parse_field_value`, but keeps the raw text for fields mapped
/// as `keyword` or `date` in the flights index so identifiers such as
/// flight numbers are not coerced into numbers.
pub fn typed_value(field: &str, raw: &str) -> FieldValue {
    match flight_field_type(field) {
        Some("keyword") | Some("date") => FieldValue::Text(raw.to_string()),
        _ => parse_field_value(raw),
    }
}

/// Parse a compact filter expression into a query.
///
/// Returns `Ok(None)` for an empty expression. A single positive clause
/// is returned as-is; anything else is wrapped in a bool query where
/// exact/range clauses go to `filter`, full-text matches go to `must`,
/// and negated clauses go to `must_not`.
pub fn parse_where(input: &str) -> Result<Option<Query>> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut bool_query = BoolQuery::default();

    for token in tokens {
        let (negated, body) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };

        let mut alternatives = Vec::new();
        let mut default_field: Option<String> = None;
        for raw_alt in body.split('|') {
            let alt = raw_alt.trim();
            if alt.is_empty() {
                continue;
            }
            // Later alternatives are values of the first field; dates
            // contain `:` so they are never split again.
            let (field, value) = match (&default_field, alt.split_once(':')) {
                (Some(field), _) => (field.clone(), alt),
                (None, Some((field, value))) => (field.trim().to_string(), value.trim()),
                (None, None) => {
                    bail!("expected `field:value` in filter expression, found `{alt}`")
                }
            };
            if field.is_empty() {
                bail!("empty field name in `{alt}`");
            }
            if default_field.is_none() {
                default_field = Some(field.clone());
            }
            alternatives.push(parse_clause(&field, value)?);
        }

        let clause = match alternatives.len() {
            0 => continue,
            1 => alternatives.remove(0),
            _ => Query::Bool(BoolQuery {
                should: alternatives,
                ..BoolQuery::default()
            }),
        };

        if negated {
            bool_query.must_not.push(clause);
        } else if matches!(clause, Query::Match { .. }) {
            bool_query.must.push(clause);
        } else {
            bool_query.filter.push(clause);
        }
    }

    if bool_query.is_empty() {
        return Ok(None);
    }

    let positives = bool_query.must.len() + bool_query.filter.len();
    if positives == 1 && bool_query.must_not.is_empty() {
        let single = bool_query
            .must
            .pop()
            .or_else(|| bool_query.filter.pop())
            .ok_or_else(|| anyhow!("filter expression produced no clauses"))?;
        return Ok(Some(single));
    }

    Ok(Some(Query::Bool(bool_query)))
}

fn parse_clause(field: &str, value: &str) -> Result<Query> {
    if value.is_empty() {
        bail!("missing value for `{field}`");
    }

    if let Some(text) = value.strip_prefix('~') {
        return Ok(Query::match_field(field, text.to_string()));
    }

    let bound = |raw: &str| -> Result<FieldValue> {
        if raw.is_empty() {
            bail!("missing bound for `{field}`");
        }
        Ok(typed_value(field, raw))
    };

    let bounds = if let Some((low, high)) = value.split_once("..") {
        let bounds = RangeBounds {
            gte: (!low.is_empty()).then(|| bound(low)).transpose()?,
            lte: (!high.is_empty()).then(|| bound(high)).transpose()?,
            ..RangeBounds::default()
        };
        if bounds.is_empty() {
            bail!("range for `{field}` needs at least one bound");
        }
        Some(bounds)
    } else if let Some(raw) = value.strip_prefix(">=") {
        Some(RangeBounds {
            gte: Some(bound(raw)?),
            ..RangeBounds::default()
        })
    } else if let Some(raw) = value.strip_prefix("<=") {
        Some(RangeBounds {
            lte: Some(bound(raw)?),
            ..RangeBounds::default()
        })
    } else if let Some(raw) = value.strip_prefix('>') {
        Some(RangeBounds {
            gt: Some(bound(raw)?),
            ..RangeBounds::default()
        })
    } else if let Some(raw) = value.strip_prefix('<') {
        Some(RangeBounds {
            lt: Some(bound(raw)?),
            ..RangeBounds::default()
        })
    } else {
        None
    };

    Ok(match bounds {
        Some(bounds) => Query::range(field, bounds),
        None => Query::term(field, typed_value(field, value)),
    })
}

/// Tokenize an expression, treating whitespace as separators and
/// allowing double-quoted segments to contain spaces.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(request: &SearchRequest) -> serde_json::Value {
        serde_json::to_value(request).expect("serialize request")
    }

    #[test]
    fn match_all_defaults_to_ten_hits() {
        let request = build_query(QueryKind::MatchAll, QueryParams::default()).expect("build");
        assert_eq!(body(&request), json!({"size": 10, "query": {"match_all": {}}}));
    }

    #[test]
    fn term_requires_field_and_value() {
        let err = build_query(QueryKind::Term, QueryParams::default()).expect_err("no field");
        assert!(err.to_string().contains("term query requires a field"));

        let params = QueryParams {
            field: Some("Carrier".to_string()),
            ..QueryParams::default()
        };
        let err = build_query(QueryKind::Term, params).expect_err("no value");
        assert!(err.to_string().contains("requires a value"));
    }

    #[test]
    fn term_query_uses_requested_size() {
        let params = QueryParams {
            field: Some("Carrier".to_string()),
            value: Some("ES-Air".into()),
            size: Some(5),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Term, params).expect("build");
        assert_eq!(
            body(&request),
            json!({"size": 5, "query": {"term": {"Carrier": "ES-Air"}}})
        );
    }

    #[test]
    fn range_emits_only_provided_bounds() {
        let params = QueryParams {
            field: Some("AvgTicketPrice".to_string()),
            gte: Some(FieldValue::Integer(200)),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Range, params).expect("build");
        assert_eq!(
            body(&request)["query"],
            json!({"range": {"AvgTicketPrice": {"gte": 200}}})
        );

        let params = QueryParams {
            field: Some("AvgTicketPrice".to_string()),
            ..QueryParams::default()
        };
        let err = build_query(QueryKind::Range, params).expect_err("no bounds");
        assert!(err.to_string().contains("at least one bound"));
    }

    #[test]
    fn bool_requires_a_clause() {
        let err = build_query(QueryKind::Bool, QueryParams::default()).expect_err("empty bool");
        assert!(err.to_string().contains("bool query requires"));

        let params = QueryParams {
            must: Some(vec![Query::match_field("OriginCityName", "Adelaide")]),
            must_not: Some(vec![Query::term("Cancelled", true)]),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Bool, params).expect("build");
        assert_eq!(
            body(&request)["query"],
            json!({"bool": {
                "must": [{"match": {"OriginCityName": "Adelaide"}}],
                "must_not": [{"term": {"Cancelled": true}}]
            }})
        );
    }

    #[test]
    fn aggs_are_named_after_type_and_field_with_zero_hits() {
        let params = QueryParams {
            aggs_type: Some(AggsType::Terms),
            field: Some("Carrier".to_string()),
            avg_field: Some("AvgTicketPrice".to_string()),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Aggs, params).expect("build");
        assert_eq!(
            body(&request),
            json!({
                "size": 0,
                "aggs": {"terms_on_Carrier": {
                    "terms": {"field": "Carrier"},
                    "aggs": {"avg_value": {"avg": {"field": "AvgTicketPrice"}}}
                }}
            })
        );

        let params = QueryParams {
            aggs_type: Some(AggsType::Avg),
            field: Some("FlightDelayMin".to_string()),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Aggs, params).expect("build");
        assert_eq!(
            body(&request)["aggs"],
            json!({"avg_on_FlightDelayMin": {"avg": {"field": "FlightDelayMin"}}})
        );
    }

    #[test]
    fn sort_defaults_to_descending_without_query() {
        let params = QueryParams {
            field: Some("AvgTicketPrice".to_string()),
            ..QueryParams::default()
        };
        let request = build_query(QueryKind::Sort, params).expect("build");
        assert_eq!(
            body(&request),
            json!({"size": 10, "sort": [{"AvgTicketPrice": {"order": "desc"}}]})
        );
    }

    #[test]
    fn parse_kind_and_order_names() {
        assert_eq!(parse_query_kind("match-all").expect("kind"), QueryKind::MatchAll);
        assert_eq!(parse_query_kind("AGGS").expect("kind"), QueryKind::Aggs);
        let err = parse_query_kind("fuzzy").expect_err("unknown");
        assert_eq!(err.to_string(), "Unsupported query type: fuzzy");

        assert_eq!(parse_sort_order("ASC").expect("order"), SortOrder::Asc);
        assert!(parse_sort_order("up").is_err());
    }

    #[test]
    fn field_values_pick_most_specific_type() {
        assert_eq!(parse_field_value("true"), FieldValue::Bool(true));
        assert_eq!(parse_field_value("42"), FieldValue::Integer(42));
        assert_eq!(parse_field_value("612.5"), FieldValue::Float(612.5));
        assert_eq!(parse_field_value("ES-Air"), FieldValue::Text("ES-Air".to_string()));
        assert_eq!(parse_field_value("NaN"), FieldValue::Text("NaN".to_string()));

        assert_eq!(typed_value("FlightNum", "12345"), FieldValue::Text("12345".to_string()));
        assert_eq!(typed_value("FlightDelayMin", "60"), FieldValue::Integer(60));
    }

    #[test]
    fn where_single_term_is_returned_unwrapped() {
        let query = parse_where("Carrier:ES-Air").expect("parse").expect("query");
        assert_eq!(query, Query::term("Carrier", "ES-Air"));
        assert_eq!(parse_where("   ").expect("parse"), None);
    }

    #[test]
    fn where_combines_ranges_matches_and_negations() {
        let query = parse_where(r#"AvgTicketPrice:200..400 OriginCityName:"~Rio de Janeiro" -Cancelled:true"#)
            .expect("parse")
            .expect("query");

        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            json!({"bool": {
                "must": [{"match": {"OriginCityName": "Rio de Janeiro"}}],
                "must_not": [{"term": {"Cancelled": true}}],
                "filter": [{"range": {"AvgTicketPrice": {"gte": 200, "lte": 400}}}]
            }})
        );
    }

    #[test]
    fn where_alternatives_inherit_field() {
        let query = parse_where("Carrier:ES-Air|JetBeats DistanceKilometers:>5000")
            .expect("parse")
            .expect("query");
        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            json!({"bool": {"filter": [
                {"bool": {"should": [
                    {"term": {"Carrier": "ES-Air"}},
                    {"term": {"Carrier": "JetBeats"}}
                ]}},
                {"range": {"DistanceKilometers": {"gt": 5000}}}
            ]}})
        );
    }

    #[test]
    fn where_rejects_bare_tokens_and_empty_values() {
        let err = parse_where("ES-Air").expect_err("bare token");
        assert!(err.to_string().contains("expected `field:value`"));

        let err = parse_where("Carrier:").expect_err("empty value");
        assert!(err.to_string().contains("missing value for `Carrier`"));

        let err = parse_where("AvgTicketPrice:..").expect_err("empty range");
        assert!(err.to_string().contains("at least one bound"));

        for expr in [
            "AvgTicketPrice:>=",
            "AvgTicketPrice:<=",
            "AvgTicketPrice:>",
            "AvgTicketPrice:<",
        ] {
            let err = parse_where(expr).expect_err("empty comparison bound");
            assert!(
                err.to_string().contains("missing bound for `AvgTicketPrice`"),
                "{expr}: {err}"
            );
        }
    }

    #[test]
    fn where_timestamp_alternatives_keep_colons_in_values() {
        let query = parse_where("timestamp:2025-01-06T00:00:00|2025-01-07T00:00:00")
            .expect("parse")
            .expect("query");
        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            json!({"bool": {"should": [
                {"term": {"timestamp": "2025-01-06T00:00:00"}},
                {"term": {"timestamp": "2025-01-07T00:00:00"}}
            ]}})
        );
    }

    #[test]
    fn where_date_ranges_keep_text_bounds() {
        let query = parse_where("timestamp:2025-01-06T00:00:00..2025-02-06T00:00:00")
            .expect("parse")
            .expect("query");
        assert_eq!(
            serde_json::to_value(&query).expect("serialize"),
            json!({"range": {"timestamp": {
                "gte": "2025-01-06T00:00:00",
                "lte": "2025-02-06T00:00:00"
            }}})
        );
    }
}
