use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub base_delivery_fee: f64,
    pub delivery_fee_per_km: f64,
    pub default_search_radius_km: f64,
    pub default_available_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            base_delivery_fee: 3.50,
            delivery_fee_per_km: 0.50,
            default_search_radius_km: 15.0,
            default_available_limit: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            base_delivery_fee: parse_or_default("BASE_DELIVERY_FEE", defaults.base_delivery_fee)?,
            delivery_fee_per_km: parse_or_default(
                "DELIVERY_FEE_PER_KM",
                defaults.delivery_fee_per_km,
            )?,
            default_search_radius_km: parse_or_default(
                "DEFAULT_SEARCH_RADIUS_KM",
                defaults.default_search_radius_km,
            )?,
            default_available_limit: parse_or_default(
                "DEFAULT_AVAILABLE_LIMIT",
                defaults.default_available_limit,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "EVENT_BUFFER_SIZE must be > 0".to_string(),
            ));
        }

        let fees_valid = self.base_delivery_fee.is_finite()
            && self.base_delivery_fee >= 0.0
            && self.delivery_fee_per_km.is_finite()
            && self.delivery_fee_per_km >= 0.0;
        if !fees_valid {
            return Err(AppError::Internal(
                "delivery fees must be finite and non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
