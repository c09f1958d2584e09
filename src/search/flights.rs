//! Catalogue of ready-made queries over the Kibana sample flights
//! dataset.
//!
//! Each `FlightQuery` variant expands to a `SearchRequest` against the
//! flights index. The serialized form (`{"name": "by-carrier",
//! "carrier": "ES-Air"}`) doubles as the request body of
//! `POST /v1/flights`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::models::{Aggregation, BoolQuery, FieldValue, Query, RangeBounds, SearchRequest, SortOrder};
use crate::search::query::DEFAULT_SIZE;

/// Minimum delay (minutes) used by delay analysis when none is given.
pub const DEFAULT_MIN_DELAY: i64 = 40;

/// Distance threshold (kilometres) for long-distance flights.
pub const DEFAULT_LONG_DISTANCE_KM: f64 = 5000.0;

fn default_size() -> u32 {
    DEFAULT_SIZE
}

fn default_min_delay() -> i64 {
    DEFAULT_MIN_DELAY
}

fn default_long_distance_km() -> f64 {
    DEFAULT_LONG_DISTANCE_KM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum FlightQuery {
    /// Every flight (server-side default page size unless `size` is set).
    All {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u32>,
    },
    /// Flights operated by an exact carrier name.
    ByCarrier {
        carrier: String,
        #[serde(default = "default_size")]
        size: u32,
    },
    /// Flights whose origin city matches the given text.
    ByOriginCity {
        city: String,
        #[serde(default = "default_size")]
        size: u32,
    },
    /// Flights with an average ticket price in `[min_price, max_price]`.
    PriceRange {
        min_price: f64,
        max_price: f64,
        #[serde(default = "default_size")]
        size: u32,
    },
    /// Average ticket price bucketed by carrier.
    AvgPricePerCarrier,
    /// Flights strictly longer than `min_km` kilometres.
    LongDistance {
        #[serde(default = "default_long_distance_km")]
        min_km: f64,
    },
    /// Flights departing at an exact timestamp.
    OnDate { date: String },
    /// Flights departing within `[from, to]`.
    DateRange { from: String, to: String },
    /// Delayed flights summarised per carrier and delay type.
    DelayAnalysis {
        #[serde(default = "default_min_delay")]
        min_delay: i64,
    },
    /// Cancelled flights bucketed by origin weather.
    CancelledByWeather,
    /// Most expensive flights first.
    TopPrices {
        #[serde(default = "default_size")]
        size: u32,
    },
}

impl FlightQuery {
    /// Catalogue name, as used by the CLI and the HTTP API.
    pub fn name(&self) -> &'static str {
        match self {
            FlightQuery::All { .. } => "all",
            FlightQuery::ByCarrier { .. } => "by-carrier",
            FlightQuery::ByOriginCity { .. } => "by-origin-city",
            FlightQuery::PriceRange { .. } => "price-range",
            FlightQuery::AvgPricePerCarrier => "avg-price-per-carrier",
            FlightQuery::LongDistance { .. } => "long-distance",
            FlightQuery::OnDate { .. } => "on-date",
            FlightQuery::DateRange { .. } => "date-range",
            FlightQuery::DelayAnalysis { .. } => "delay-analysis",
            FlightQuery::CancelledByWeather => "cancelled-by-weather",
            FlightQuery::TopPrices { .. } => "top-prices",
        }
    }

    /// Human-readable heading for text output.
    pub fn title(&self) -> String {
        match self {
            FlightQuery::All { .. } => "All flights".to_string(),
            FlightQuery::ByCarrier { carrier, size } => {
                format!("Flights by carrier '{carrier}' (first {size})")
            }
            FlightQuery::ByOriginCity { city, size } => {
                format!("Flights from {city} (first {size})")
            }
            FlightQuery::PriceRange {
                min_price,
                max_price,
                size,
            } => format!("Flights between ${min_price}-${max_price} (first {size})"),
            FlightQuery::AvgPricePerCarrier => "Average price per carrier".to_string(),
            FlightQuery::LongDistance { min_km } => {
                format!("Long distance flights (> {min_km} km)")
            }
            FlightQuery::OnDate { date } => format!("Flights on {date}"),
            FlightQuery::DateRange { from, to } => format!("Flights from {from} to {to}"),
            FlightQuery::DelayAnalysis { min_delay } => {
                format!("Flights delayed by at least {min_delay} minutes")
            }
            FlightQuery::CancelledByWeather => "Cancelled flights by origin weather".to_string(),
            FlightQuery::TopPrices { size } => format!("Most expensive flights (top {size})"),
        }
    }

    /// Expand into a search request, validating the arguments.
    pub fn to_request(&self) -> Result<SearchRequest> {
        let request = match self {
            FlightQuery::All { size } => {
                let request = SearchRequest::with_query(Query::MatchAll);
                match size {
                    Some(size) => request.size(*size),
                    None => request,
                }
            }
            FlightQuery::ByCarrier { carrier, size } => {
                let carrier = non_empty("carrier", carrier)?;
                SearchRequest::with_query(Query::term("Carrier", carrier)).size(*size)
            }
            FlightQuery::ByOriginCity { city, size } => {
                let city = non_empty("city", city)?;
                SearchRequest::with_query(Query::match_field("OriginCityName", city)).size(*size)
            }
            FlightQuery::PriceRange {
                min_price,
                max_price,
                size,
            } => {
                if !min_price.is_finite() || !max_price.is_finite() {
                    bail!("price bounds must be finite numbers");
                }
                if min_price > max_price {
                    bail!("min price {min_price} is greater than max price {max_price}");
                }
                let bounds = RangeBounds {
                    gte: Some(number(*min_price)),
                    lte: Some(number(*max_price)),
                    ..RangeBounds::default()
                };
                SearchRequest::with_query(Query::range("AvgTicketPrice", bounds)).size(*size)
            }
            FlightQuery::AvgPricePerCarrier => SearchRequest::default().size(0).aggregate(
                "avg_price_per_carrier",
                Aggregation::terms("Carrier")
                    .with_sub("avg_price", Aggregation::avg("AvgTicketPrice")),
            ),
            FlightQuery::LongDistance { min_km } => {
                if !min_km.is_finite() || *min_km < 0.0 {
                    bail!("distance threshold must be a non-negative number");
                }
                let bounds = RangeBounds {
                    gt: Some(number(*min_km)),
                    ..RangeBounds::default()
                };
                SearchRequest::with_query(Query::range("DistanceKilometers", bounds))
            }
            FlightQuery::OnDate { date } => {
                let timestamp = format_timestamp(parse_timestamp(date)?)?;
                SearchRequest::with_query(Query::term("timestamp", timestamp))
            }
            FlightQuery::DateRange { from, to } => {
                let start = parse_timestamp(from)?;
                let end = parse_timestamp(to)?;
                if start > end {
                    bail!("date range start {from} is after end {to}");
                }
                let bounds = RangeBounds {
                    gte: Some(FieldValue::Text(format_timestamp(start)?)),
                    lte: Some(FieldValue::Text(format_timestamp(end)?)),
                    ..RangeBounds::default()
                };
                SearchRequest::with_query(Query::range("timestamp", bounds))
            }
            FlightQuery::DelayAnalysis { min_delay } => delay_analysis_request(*min_delay)?,
            FlightQuery::CancelledByWeather => {
                let cancelled = Query::Bool(BoolQuery {
                    filter: vec![Query::term("Cancelled", true)],
                    ..BoolQuery::default()
                });
                SearchRequest::with_query(cancelled)
                    .size(0)
                    .aggregate("cancellations_by_weather", Aggregation::terms("OriginWeather"))
            }
            FlightQuery::TopPrices { size } => {
                SearchRequest::default().size(*size).sort_by("AvgTicketPrice", SortOrder::Desc)
            }
        };

        Ok(request)
    }
}

/// Delayed flights (`FlightDelayMin >= min_delay`) summarised by
/// carrier (with average delay) and by delay type. No hits are
/// returned, only aggregations and the total count.
pub fn delay_analysis_request(min_delay: i64) -> Result<SearchRequest> {
    if min_delay < 0 {
        bail!("min_delay must be non-negative, got {min_delay}");
    }

    let delayed = Query::range(
        "FlightDelayMin",
        RangeBounds {
            gte: Some(FieldValue::Integer(min_delay)),
            ..RangeBounds::default()
        },
    );

    Ok(SearchRequest::with_query(delayed)
        .size(0)
        .aggregate(
            "delays_by_carrier",
            Aggregation::terms("Carrier").with_sub("avg_delay", Aggregation::avg("FlightDelayMin")),
        )
        .aggregate("delay_types", Aggregation::terms("FlightDelayType")))
}

fn non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{what} must not be empty");
    }
    Ok(trimmed)
}

/// Whole numbers are sent as integers so bodies read like hand-written
/// queries (`"gte": 200` rather than `200.0`).
fn number(value: f64) -> FieldValue {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        FieldValue::Integer(value as i64)
    } else {
        FieldValue::Float(value)
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SS` or a bare `YYYY-MM-DD` (midnight).
pub fn parse_timestamp(raw: &str) -> Result<PrimitiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(timestamp) = PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Ok(timestamp);
    }

    let date = Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date `{trimmed}` (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)"))?;
    Ok(date.midnight())
}

fn format_timestamp(timestamp: PrimitiveDateTime) -> Result<String> {
    timestamp
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]"
        ))
        .context("failed to format timestamp")
}
