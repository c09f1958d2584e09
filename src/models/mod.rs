//! Shared data models for query bodies, search responses, and the
//! flights index mapping.
//!
//! These types form the JSON surface exchanged with Elasticsearch as
//! well as the stable output of the CLI and the HTTP daemon. Query and
//! aggregation values serialize to exactly the Query DSL shapes the
//! search service accepts, so a `SearchRequest` can be posted as-is to
//! `/{index}/_search`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version for `FormattedResults` JSON payloads emitted by the
/// CLI (`--format json`) and the HTTP API.
///
/// Follows semver: additive optional fields bump MINOR, breaking changes
/// to required fields bump MAJOR.
pub const RESULT_SCHEMA_VERSION: &str = "1.0.0";

/// Name of the Kibana sample flights index.
pub const FLIGHTS_INDEX: &str = "kibana_sample_data_flights";

/// Error raised when a JSON value does not describe a supported query,
/// aggregation, or sort clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDsl(pub String);

impl fmt::Display for InvalidDsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid query DSL: {}", self.0)
    }
}

impl std::error::Error for InvalidDsl {}

fn invalid(message: impl Into<String>) -> InvalidDsl {
    InvalidDsl(message.into())
}

/// Scalar value used by `term`, `match`, and `range` queries.
///
/// Dates (e.g. `timestamp` bounds) are carried as text, matching how
/// the search service accepts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(b) => Value::Bool(b),
            FieldValue::Integer(i) => Value::from(i),
            FieldValue::Float(f) => Value::from(f),
            FieldValue::Text(s) => Value::String(s),
        }
    }
}

impl TryFrom<Value> for FieldValue {
    type Error = InvalidDsl;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(FieldValue::Bool(b)),
            Value::String(s) => Ok(FieldValue::Text(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Float(f))
                } else {
                    Err(invalid(format!("unsupported number {n}")))
                }
            }
            other => Err(invalid(format!("expected a scalar value, found {other}"))),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Bounds of a `range` query. Absent bounds are omitted from the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<FieldValue>,
}

impl RangeBounds {
    pub fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }
}

/// Clauses of a compound `bool` query.
///
/// Empty clause lists are left out of the serialized body, so an
/// entirely empty bool query becomes `{"bool": {}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub should: Vec<Query>,
    pub filter: Vec<Query>,
}

impl BoolQuery {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.must_not.is_empty()
            && self.should.is_empty()
            && self.filter.is_empty()
    }
}

/// A leaf or compound query in the search service's Query DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Query {
    MatchAll,
    /// Exact match on a keyword/numeric/date field.
    Term { field: String, value: FieldValue },
    /// Analyzed full-text match.
    Match { field: String, value: FieldValue },
    Range { field: String, bounds: RangeBounds },
    Bool(BoolQuery),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn match_field(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Query::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        Query::Range {
            field: field.into(),
            bounds,
        }
    }
}

fn keyed(key: impl Into<String>, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.into(), value);
    Value::Object(map)
}

fn queries_to_value(queries: Vec<Query>) -> Value {
    Value::Array(queries.into_iter().map(Value::from).collect())
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        match query {
            Query::MatchAll => keyed("match_all", Value::Object(Map::new())),
            Query::Term { field, value } => keyed("term", keyed(field, value.into())),
            Query::Match { field, value } => keyed("match", keyed(field, value.into())),
            Query::Range { field, bounds } => {
                let mut map = Map::new();
                for (name, bound) in [
                    ("gt", bounds.gt),
                    ("gte", bounds.gte),
                    ("lt", bounds.lt),
                    ("lte", bounds.lte),
                ] {
                    if let Some(bound) = bound {
                        map.insert(name.to_string(), bound.into());
                    }
                }
                keyed("range", keyed(field, Value::Object(map)))
            }
            Query::Bool(bool_query) => {
                let BoolQuery {
                    must,
                    must_not,
                    should,
                    filter,
                } = bool_query;
                let mut map = Map::new();
                for (name, clauses) in [
                    ("must", must),
                    ("must_not", must_not),
                    ("should", should),
                    ("filter", filter),
                ] {
                    if !clauses.is_empty() {
                        map.insert(name.to_string(), queries_to_value(clauses));
                    }
                }
                keyed("bool", Value::Object(map))
            }
        }
    }
}

/// Split a `{ "key": value }` object into its single entry.
fn single_entry(value: Value, what: &str) -> Result<(String, Value), InvalidDsl> {
    let Value::Object(map) = value else {
        return Err(invalid(format!("{what} must be a JSON object")));
    };
    if map.len() != 1 {
        return Err(invalid(format!(
            "{what} must have exactly one key, found {}",
            map.len()
        )));
    }
    map.into_iter()
        .next()
        .ok_or_else(|| invalid(format!("{what} is empty")))
}

/// Accept both the short form (`{"Carrier": "ES-Air"}`) and the long
/// form (`{"Carrier": {"value": "ES-Air"}}` / `{"query": ...}`).
fn leaf_value(value: Value, long_key: &str) -> Result<FieldValue, InvalidDsl> {
    match value {
        Value::Object(mut map) => {
            let inner = map
                .remove(long_key)
                .ok_or_else(|| invalid(format!("expected `{long_key}` in long-form query")))?;
            FieldValue::try_from(inner)
        }
        other => FieldValue::try_from(other),
    }
}

fn clause_list(value: Value) -> Result<Vec<Query>, InvalidDsl> {
    match value {
        Value::Array(items) => items.into_iter().map(Query::try_from).collect(),
        single => Ok(vec![Query::try_from(single)?]),
    }
}

impl TryFrom<Value> for Query {
    type Error = InvalidDsl;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let (kind, body) = single_entry(value, "query")?;
        match kind.as_str() {
            "match_all" => Ok(Query::MatchAll),
            "term" => {
                let (field, value) = single_entry(body, "term query")?;
                Ok(Query::Term {
                    field,
                    value: leaf_value(value, "value")?,
                })
            }
            "match" => {
                let (field, value) = single_entry(body, "match query")?;
                Ok(Query::Match {
                    field,
                    value: leaf_value(value, "query")?,
                })
            }
            "range" => {
                let (field, bounds) = single_entry(body, "range query")?;
                let bounds: RangeBounds = serde_json::from_value(bounds)
                    .map_err(|err| invalid(format!("range bounds for `{field}`: {err}")))?;
                Ok(Query::Range { field, bounds })
            }
            "bool" => {
                let Value::Object(map) = body else {
                    return Err(invalid("bool query must be a JSON object"));
                };
                let mut bool_query = BoolQuery::default();
                for (clause, value) in map {
                    let queries = clause_list(value)?;
                    match clause.as_str() {
                        "must" => bool_query.must = queries,
                        "must_not" => bool_query.must_not = queries,
                        "should" => bool_query.should = queries,
                        "filter" => bool_query.filter = queries,
                        other => return Err(invalid(format!("unknown bool clause `{other}`"))),
                    }
                }
                Ok(Query::Bool(bool_query))
            }
            other => Err(invalid(format!("unsupported query type `{other}`"))),
        }
    }
}

/// Sort direction for a sort clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// A single `{field: {"order": ...}}` sort entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
}

impl From<SortClause> for Value {
    fn from(clause: SortClause) -> Self {
        keyed(
            clause.field,
            keyed("order", Value::String(clause.order.as_str().to_string())),
        )
    }
}

impl TryFrom<Value> for SortClause {
    type Error = InvalidDsl;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        // A bare field name sorts ascending.
        if let Value::String(field) = value {
            return Ok(SortClause {
                field,
                order: SortOrder::Asc,
            });
        }
        let (field, spec) = single_entry(value, "sort clause")?;
        let order = match spec {
            Value::String(order) => order,
            Value::Object(mut map) => match map.remove("order") {
                Some(Value::String(order)) => order,
                _ => return Err(invalid(format!("sort on `{field}` is missing `order`"))),
            },
            _ => return Err(invalid(format!("invalid sort spec for `{field}`"))),
        };
        let order = match order.as_str() {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            other => return Err(invalid(format!("unknown sort order `{other}`"))),
        };
        Ok(SortClause { field, order })
    }
}

/// Server-side aggregation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Aggregation {
    /// Bucket documents by the distinct values of `field`.
    Terms {
        field: String,
        size: Option<u32>,
        aggs: BTreeMap<String, Aggregation>,
    },
    /// Average of a numeric field.
    Avg { field: String },
}

impl Aggregation {
    pub fn terms(field: impl Into<String>) -> Self {
        Aggregation::Terms {
            field: field.into(),
            size: None,
            aggs: BTreeMap::new(),
        }
    }

    pub fn avg(field: impl Into<String>) -> Self {
        Aggregation::Avg {
            field: field.into(),
        }
    }

    /// Attach a named sub-aggregation. Metric aggregations cannot hold
    /// children, so the call is a no-op for them.
    pub fn with_sub(mut self, name: impl Into<String>, sub: Aggregation) -> Self {
        if let Aggregation::Terms { aggs, .. } = &mut self {
            aggs.insert(name.into(), sub);
        }
        self
    }
}

impl From<Aggregation> for Value {
    fn from(aggregation: Aggregation) -> Self {
        match aggregation {
            Aggregation::Terms { field, size, aggs } => {
                let mut terms = Map::new();
                terms.insert("field".to_string(), Value::String(field));
                if let Some(size) = size {
                    terms.insert("size".to_string(), Value::from(size));
                }
                let mut map = Map::new();
                map.insert("terms".to_string(), Value::Object(terms));
                if !aggs.is_empty() {
                    map.insert("aggs".to_string(), aggs_to_value(aggs));
                }
                Value::Object(map)
            }
            Aggregation::Avg { field } => keyed("avg", keyed("field", Value::String(field))),
        }
    }
}

fn aggs_to_value(aggs: BTreeMap<String, Aggregation>) -> Value {
    Value::Object(
        aggs.into_iter()
            .map(|(name, agg)| (name, Value::from(agg)))
            .collect(),
    )
}

fn aggs_from_value(value: Value) -> Result<BTreeMap<String, Aggregation>, InvalidDsl> {
    let Value::Object(map) = value else {
        return Err(invalid("aggs must be a JSON object"));
    };
    map.into_iter()
        .map(|(name, agg)| Ok((name, Aggregation::try_from(agg)?)))
        .collect()
}

fn agg_field(body: &Value, kind: &str) -> Result<String, InvalidDsl> {
    body.get("field")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("{kind} aggregation requires a `field`")))
}

impl TryFrom<Value> for Aggregation {
    type Error = InvalidDsl;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(invalid("aggregation must be a JSON object"));
        };
        let sub = map.remove("aggs").or_else(|| map.remove("aggregations"));

        if let Some(body) = map.remove("terms") {
            let field = agg_field(&body, "terms")?;
            let size = match body.get("size") {
                Some(size) => Some(
                    size.as_u64()
                        .and_then(|s| u32::try_from(s).ok())
                        .ok_or_else(|| invalid("terms size must be a non-negative integer"))?,
                ),
                None => None,
            };
            let aggs = match sub {
                Some(sub) => aggs_from_value(sub)?,
                None => BTreeMap::new(),
            };
            return Ok(Aggregation::Terms { field, size, aggs });
        }

        if let Some(body) = map.remove("avg") {
            if sub.is_some() {
                return Err(invalid("avg aggregation cannot have sub-aggregations"));
            }
            return Ok(Aggregation::Avg {
                field: agg_field(&body, "avg")?,
            });
        }

        let kinds: Vec<String> = map.keys().cloned().collect();
        Err(invalid(format!(
            "unsupported aggregation `{}`",
            kinds.join(",")
        )))
    }
}

/// Top-level body of a `_search` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortClause>,
    #[serde(default, alias = "aggregations", skip_serializing_if = "BTreeMap::is_empty")]
    pub aggs: BTreeMap<String, Aggregation>,
}

impl SearchRequest {
    pub fn with_query(query: Query) -> Self {
        Self {
            query: Some(query),
            ..Self::default()
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortClause {
            field: field.into(),
            order,
        });
        self
    }

    pub fn aggregate(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggs.insert(name.into(), aggregation);
        self
    }
}

/// Total hit count as reported by the search service.
///
/// Recent servers report `{"value": n, "relation": "eq"}`; older ones
/// report a bare integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Count(u64),
    Object {
        value: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relation: Option<String>,
    },
}

impl TotalHits {
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Count(value) | TotalHits::Object { value, .. } => *value,
        }
    }
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// The subset of a `_search` response consumed by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub hits: HitsEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
}

/// Flattened search results returned by the CLI and the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedResults {
    pub version: String,
    pub total_hits: u64,
    pub took_ms: u64,
    /// `_source` documents of the returned hits, in response order.
    pub hits: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
}

/// Flatten a raw search response into `FormattedResults`.
///
/// When the service omits `hits.total` the number of returned hits is
/// used instead.
pub fn format_response(response: SearchResponse) -> FormattedResults {
    let returned = response.hits.hits.len() as u64;
    let total_hits = response
        .hits
        .total
        .as_ref()
        .map(TotalHits::value)
        .unwrap_or(returned);

    FormattedResults {
        version: RESULT_SCHEMA_VERSION.to_string(),
        total_hits,
        took_ms: response.took,
        hits: response.hits.hits.into_iter().map(|hit| hit.source).collect(),
        aggregations: response.aggregations,
    }
}

/// Field types of the flights index, in mapping order.
pub const FLIGHT_FIELDS: &[(&str, &str)] = &[
    ("FlightNum", "keyword"),
    ("DestCountry", "keyword"),
    ("OriginWeather", "keyword"),
    ("OriginCityName", "keyword"),
    ("AvgTicketPrice", "float"),
    ("DistanceMiles", "float"),
    ("FlightDelay", "boolean"),
    ("DestWeather", "keyword"),
    ("Dest", "keyword"),
    ("FlightDelayType", "keyword"),
    ("OriginCountry", "keyword"),
    ("dayOfWeek", "integer"),
    ("DistanceKilometers", "float"),
    ("timestamp", "date"),
    ("DestLocation", "geo_point"),
    ("DestAirportID", "keyword"),
    ("Carrier", "keyword"),
    ("Cancelled", "boolean"),
    ("FlightTimeMin", "float"),
    ("Origin", "keyword"),
    ("OriginLocation", "geo_point"),
    ("DestRegion", "keyword"),
    ("OriginAirportID", "keyword"),
    ("OriginRegion", "keyword"),
    ("DestCityName", "keyword"),
    ("FlightTimeHour", "float"),
    ("FlightDelayMin", "integer"),
];

/// Look up the mapped type of a flights field.
pub fn flight_field_type(field: &str) -> Option<&'static str> {
    FLIGHT_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kind)| *kind)
}

/// Index creation body (`{"mappings": {"properties": ...}}`) for the
/// flights index.
pub fn flights_index_mapping() -> Value {
    let properties: Map<String, Value> = FLIGHT_FIELDS
        .iter()
        .map(|(name, kind)| {
            (
                name.to_string(),
                keyed("type", Value::String(kind.to_string())),
            )
        })
        .collect();
    keyed("mappings", keyed("properties", Value::Object(properties)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn match_all_serializes_to_empty_object() {
        let value = serde_json::to_value(Query::MatchAll).expect("serialize");
        assert_eq!(value, json!({"match_all": {}}));
    }

    #[test]
    fn range_omits_missing_bounds() {
        let query = Query::range(
            "AvgTicketPrice",
            RangeBounds {
                gte: Some(FieldValue::Integer(200)),
                lte: Some(FieldValue::Integer(400)),
                ..RangeBounds::default()
            },
        );
        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            json!({"range": {"AvgTicketPrice": {"gte": 200, "lte": 400}}})
        );
    }

    #[test]
    fn bool_query_omits_empty_clauses() {
        let query = Query::Bool(BoolQuery {
            filter: vec![Query::term("Cancelled", true)],
            must_not: vec![Query::term("DestWeather", "Rain")],
            ..BoolQuery::default()
        });
        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            json!({"bool": {
                "must_not": [{"term": {"DestWeather": "Rain"}}],
                "filter": [{"term": {"Cancelled": true}}]
            }})
        );

        let empty = serde_json::to_value(Query::Bool(BoolQuery::default())).expect("serialize");
        assert_eq!(empty, json!({"bool": {}}));
    }

    #[test]
    fn query_parses_long_forms_and_single_clauses() {
        let query: Query = serde_json::from_value(json!({
            "bool": {
                "must": {"match": {"OriginCityName": {"query": "Adelaide"}}},
                "filter": [{"term": {"Carrier": {"value": "ES-Air"}}}]
            }
        }))
        .expect("parse bool");

        let Query::Bool(bool_query) = query else {
            panic!("expected bool query");
        };
        assert_eq!(
            bool_query.must,
            vec![Query::match_field("OriginCityName", "Adelaide")]
        );
        assert_eq!(bool_query.filter, vec![Query::term("Carrier", "ES-Air")]);
        assert!(bool_query.should.is_empty());
    }

    #[test]
    fn unknown_query_types_are_rejected() {
        let err = serde_json::from_value::<Query>(json!({"fuzzy": {"Carrier": "ES"}}))
            .expect_err("expected error");
        assert!(err.to_string().contains("unsupported query type `fuzzy`"));

        let err = serde_json::from_value::<Query>(json!({"term": {}})).expect_err("empty term");
        assert!(err.to_string().contains("exactly one key"));
    }

    #[test]
    fn terms_aggregation_with_avg_sub_aggregation() {
        let agg = Aggregation::terms("Carrier").with_sub("avg_price", Aggregation::avg("AvgTicketPrice"));
        let request = SearchRequest::default()
            .size(0)
            .aggregate("avg_price_per_carrier", agg);

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "size": 0,
                "aggs": {
                    "avg_price_per_carrier": {
                        "terms": {"field": "Carrier"},
                        "aggs": {"avg_price": {"avg": {"field": "AvgTicketPrice"}}}
                    }
                }
            })
        );

        let parsed: SearchRequest = serde_json::from_value(value).expect("parse back");
        assert_eq!(parsed, request);
    }

    #[test]
    fn avg_cannot_carry_sub_aggregations() {
        let agg = Aggregation::avg("AvgTicketPrice").with_sub("x", Aggregation::terms("Carrier"));
        assert_eq!(agg, Aggregation::avg("AvgTicketPrice"));

        let err = serde_json::from_value::<Aggregation>(json!({
            "avg": {"field": "AvgTicketPrice"},
            "aggs": {"x": {"terms": {"field": "Carrier"}}}
        }))
        .expect_err("expected error");
        assert!(err.to_string().contains("cannot have sub-aggregations"));
    }

    #[test]
    fn sort_clause_accepts_short_and_long_forms() {
        let request = SearchRequest::default().size(10).sort_by("AvgTicketPrice", SortOrder::Desc);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({"size": 10, "sort": [{"AvgTicketPrice": {"order": "desc"}}]})
        );

        let short: SortClause = serde_json::from_value(json!({"timestamp": "asc"})).expect("short");
        assert_eq!(short.order, SortOrder::Asc);
        let bare: SortClause = serde_json::from_value(json!("FlightNum")).expect("bare");
        assert_eq!(bare.field, "FlightNum");
    }

    #[test]
    fn format_response_flattens_sources_and_keeps_aggregations() {
        let response: SearchResponse = serde_json::from_value(json!({
            "took": 7,
            "timed_out": false,
            "hits": {
                "total": {"value": 1234, "relation": "eq"},
                "hits": [
                    {"_id": "a", "_score": 1.0, "_source": {"Carrier": "ES-Air"}},
                    {"_id": "b", "_score": 1.0, "_source": {"Carrier": "Kibana Airlines"}}
                ]
            },
            "aggregations": {"avg_price": {"value": 612.5}}
        }))
        .expect("parse response");

        let formatted = format_response(response);
        assert_eq!(formatted.total_hits, 1234);
        assert_eq!(formatted.took_ms, 7);
        assert_eq!(
            formatted.hits,
            vec![json!({"Carrier": "ES-Air"}), json!({"Carrier": "Kibana Airlines"})]
        );
        assert_eq!(
            formatted.aggregations,
            Some(json!({"avg_price": {"value": 612.5}}))
        );
        assert_eq!(formatted.version, RESULT_SCHEMA_VERSION);
    }

    #[test]
    fn format_response_accepts_legacy_total_and_missing_total() {
        let legacy: SearchResponse = serde_json::from_value(json!({
            "took": 1,
            "hits": {"total": 3, "hits": []}
        }))
        .expect("legacy");
        assert_eq!(format_response(legacy).total_hits, 3);

        let missing: SearchResponse = serde_json::from_value(json!({
            "took": 1,
            "hits": {"hits": [{"_source": {}}]}
        }))
        .expect("missing");
        assert_eq!(format_response(missing).total_hits, 1);
    }

    #[test]
    fn flights_mapping_covers_query_fields() {
        let mapping = flights_index_mapping();
        let properties = &mapping["mappings"]["properties"];
        assert_eq!(properties["Carrier"], json!({"type": "keyword"}));
        assert_eq!(properties["timestamp"], json!({"type": "date"}));
        assert_eq!(properties["FlightDelayMin"], json!({"type": "integer"}));
        assert_eq!(properties["DestLocation"], json!({"type": "geo_point"}));
        assert_eq!(flight_field_type("Cancelled"), Some("boolean"));
        assert_eq!(flight_field_type("Nope"), None);
    }
}
