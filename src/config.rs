//! Application configuration module
//! Handles environment variable loading, configuration validation, and
//! application settings. Billing policy (free limits, fees, dial templates)
//! is loaded once at startup into an immutable object the orchestrator is
//! constructed with; nothing here is mutated after boot.

use crate::payments::types::{ProviderName, ServiceCategory};
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub billing: BillingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Per-provider collection settings: the business number funds are pushed to
/// and the dial-string template handed to payers.
#[derive(Debug, Clone)]
pub struct ProviderDialConfig {
    pub business_number: String,
    pub dial_template: String,
}

/// Immutable billing policy: per-category free-use limits and fees, provider
/// dial settings, payment timeout and the signature secret.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub currency: String,
    pub payment_timeout_minutes: i64,
    pub signature_secret: String,
    pub free_limits: HashMap<ServiceCategory, i64>,
    pub fees: HashMap<ServiceCategory, i64>,
    pub mtn: ProviderDialConfig,
    pub orange: ProviderDialConfig,
}

impl BillingConfig {
    /// Free uses granted per user for a category before fees apply.
    pub fn free_limit(&self, category: ServiceCategory) -> i64 {
        self.free_limits.get(&category).copied().unwrap_or(0)
    }

    /// Fee charged once the free quota is exhausted, in whole XAF.
    /// `None` means no fee is configured for the category at all, which the
    /// orchestrator treats as a server misconfiguration once the quota runs
    /// out. An explicit 0 marks an always-free category.
    pub fn fee(&self, category: ServiceCategory) -> Option<BigDecimal> {
        self.fees.get(&category).map(|fee| BigDecimal::from(*fee))
    }

    pub fn dial_config(&self, provider: ProviderName) -> &ProviderDialConfig {
        match provider {
            ProviderName::Orange => &self.orange,
            // Unrecognized operators are collected through the MTN account.
            ProviderName::Mtn | ProviderName::Other => &self.mtn,
        }
    }

    pub fn payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payment_timeout_minutes)
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            billing: BillingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.billing.validate()?;

        Ok(())
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        let mut free_limits = HashMap::new();
        free_limits.insert(ServiceCategory::Doctor, 5);
        free_limits.insert(ServiceCategory::Nurse, 3);
        free_limits.insert(ServiceCategory::Biker, 2);
        free_limits.insert(ServiceCategory::Taxi, 2);
        free_limits.insert(ServiceCategory::BloodRequest, 10);

        let mut fees = HashMap::new();
        fees.insert(ServiceCategory::Doctor, 300);
        fees.insert(ServiceCategory::Nurse, 200);
        fees.insert(ServiceCategory::Biker, 100);
        fees.insert(ServiceCategory::Taxi, 150);
        // Blood requests stay free regardless of quota
        fees.insert(ServiceCategory::BloodRequest, 0);

        BillingConfig {
            currency: "XAF".to_string(),
            payment_timeout_minutes: 10,
            signature_secret: "dev-only-signing-secret".to_string(),
            free_limits,
            fees,
            mtn: ProviderDialConfig {
                business_number: "624488".to_string(),
                dial_template: "*126*9*{business}*{amount}#".to_string(),
            },
            orange: ProviderDialConfig {
                business_number: "695301".to_string(),
                dial_template: "#150*47*{business}*{amount}#".to_string(),
            },
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        for (category, env_name) in [
            (ServiceCategory::Doctor, "FREE_LIMIT_DOCTOR"),
            (ServiceCategory::Nurse, "FREE_LIMIT_NURSE"),
            (ServiceCategory::Biker, "FREE_LIMIT_BIKER"),
            (ServiceCategory::Taxi, "FREE_LIMIT_TAXI"),
            (ServiceCategory::BloodRequest, "FREE_LIMIT_BLOOD_REQUEST"),
        ] {
            let default = cfg.free_limit(category);
            cfg.free_limits.insert(category, env_i64(env_name, default)?);
        }

        for (category, env_name) in [
            (ServiceCategory::Doctor, "FEE_DOCTOR"),
            (ServiceCategory::Nurse, "FEE_NURSE"),
            (ServiceCategory::Biker, "FEE_BIKER"),
            (ServiceCategory::Taxi, "FEE_TAXI"),
            (ServiceCategory::BloodRequest, "FEE_BLOOD_REQUEST"),
        ] {
            let default = cfg.fees.get(&category).copied().unwrap_or(0);
            cfg.fees.insert(category, env_i64(env_name, default)?);
        }

        if let Ok(currency) = env::var("BILLING_CURRENCY") {
            cfg.currency = currency;
        }
        cfg.payment_timeout_minutes =
            env_i64("PAYMENT_TIMEOUT_MINUTES", cfg.payment_timeout_minutes)?;
        if let Ok(secret) = env::var("PAYMENT_SIGNING_SECRET") {
            cfg.signature_secret = secret;
        }
        if let Ok(number) = env::var("MTN_BUSINESS_NUMBER") {
            cfg.mtn.business_number = number;
        }
        if let Ok(template) = env::var("MTN_DIAL_TEMPLATE") {
            cfg.mtn.dial_template = template;
        }
        if let Ok(number) = env::var("ORANGE_BUSINESS_NUMBER") {
            cfg.orange.business_number = number;
        }
        if let Ok(template) = env::var("ORANGE_DIAL_TEMPLATE") {
            cfg.orange.dial_template = template;
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.trim().is_empty() {
            return Err(ConfigError::InvalidValue("BILLING_CURRENCY".to_string()));
        }

        if self.payment_timeout_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_TIMEOUT_MINUTES must be positive".to_string(),
            ));
        }

        if self.signature_secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_SIGNING_SECRET cannot be empty".to_string(),
            ));
        }

        for (name, fee) in self.fees.iter() {
            if *fee < 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "fee for {} cannot be negative",
                    name
                )));
            }
        }

        for (name, limit) in self.free_limits.iter() {
            if *limit < 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "free limit for {} cannot be negative",
                    name
                )));
            }
        }

        for (env_name, dial) in [("MTN_DIAL_TEMPLATE", &self.mtn), ("ORANGE_DIAL_TEMPLATE", &self.orange)] {
            if !dial.dial_template.contains("{business}") || !dial.dial_template.contains("{amount}")
            {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must contain {{business}} and {{amount}} placeholders",
                    env_name
                )));
            }
            if dial.business_number.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "{} business number cannot be empty",
                    env_name
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
