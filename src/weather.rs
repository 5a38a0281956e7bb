use crate::error::FetchError;
use crate::geo::Coordinate;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;

const SERVICE: &str = "weather";
const CURRENT_PATH: &str = "/v1/current.json";

/// Error code the weather API returns when no location matches the query.
pub const NO_MATCHING_LOCATION: i64 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TemperatureUnit {
    Fahrenheit,
    Celsius,
}

impl TemperatureUnit {
    fn field(self) -> &'static str {
        match self {
            Self::Fahrenheit => "temp_f",
            Self::Celsius => "temp_c",
        }
    }
}

/// Resolves the current temperature at a coordinate.
///
/// `Ok(None)` means the service answered but has no usable temperature for
/// that place; callers treat it as a skip, not a failure.
#[async_trait]
pub trait TemperatureLookup: Send + Sync {
    async fn current_temperature(&self, coordinate: Coordinate) -> Result<Option<Decimal>, FetchError>;
}

pub struct WeatherClient {
    http: Client,
    base_url: String,
    api_key: String,
    unit: TemperatureUnit,
}

impl WeatherClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        unit: TemperatureUnit,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::from_reqwest(SERVICE, err))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            unit,
        })
    }
}

#[async_trait]
impl TemperatureLookup for WeatherClient {
    async fn current_temperature(&self, coordinate: Coordinate) -> Result<Option<Decimal>, FetchError> {
        let url = format!("{}{}", self.base_url, CURRENT_PATH);
        let query = coordinate.to_query();
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", query.as_str()), ("aqi", "no")])
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(SERVICE, err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::from_reqwest(SERVICE, err))?;

        if status == StatusCode::BAD_REQUEST && is_no_matching_location(&body) {
            tracing::debug!(%coordinate, "weather service has no location for coordinate");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_temperature(&body, self.unit))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

fn is_no_matching_location(body: &str) -> bool {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) => {
            tracing::debug!(code = error.code, message = ?error.message, "weather service returned an error");
            error.code == NO_MATCHING_LOCATION
        }
        Err(err) => {
            tracing::debug!(error = %err, body, "failed to decode weather error body");
            false
        }
    }
}

/// Reads `current.<unit field>` exactly, as a number or numeric string.
pub fn parse_temperature(body: &str, unit: TemperatureUnit) -> Option<Decimal> {
    let weather = match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Object(obj)) => obj,
        Ok(_) => {
            tracing::debug!(body, "weather response is not an object");
            return None;
        }
        Err(err) => {
            tracing::debug!(error = %err, body, "failed to decode weather response");
            return None;
        }
    };

    let field = unit.field();
    let raw = match weather.get("current").and_then(|current| current.get(field)) {
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(other) => {
            tracing::debug!(field, value = %other, "did not understand temperature");
            return None;
        }
        None => {
            tracing::debug!(field, body, "weather response has no temperature");
            return None;
        }
    };

    match Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw)) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(field, raw = %raw, error = %err, "failed to convert temperature to decimal");
            None
        }
    }
}
