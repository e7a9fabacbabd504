use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::error::{DeskError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Trading pair, e.g. "BTC/USDT"
    pub symbol: String,
    /// Candle timeframe for analyst tools, e.g. "1h"
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Leverage applied at account setup
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Order amount in base asset units
    pub position_size: Decimal,
    /// History window for kline tools (derived from timeframe when absent)
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_leverage() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Analyst roles to run, in order
    #[serde(default = "default_analysts")]
    pub selected_analysts: Vec<String>,
    /// Bull/Bear rounds before the research judge
    #[serde(default = "default_rounds")]
    pub max_debate_rounds: u32,
    /// Risky/Safe/Neutral rounds before the risk judge
    #[serde(default = "default_rounds")]
    pub max_risk_rounds: u32,
    /// Ceiling on LLM <-> tool iterations inside one analyst stage
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_analysts() -> Vec<String> {
    vec![
        "market".to_string(),
        "crypto".to_string(),
        "sentiment".to_string(),
        "news".to_string(),
    ]
}

fn default_rounds() -> u32 {
    2
}

fn default_max_tool_iterations() -> u32 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            selected_analysts: default_analysts(),
            max_debate_rounds: default_rounds(),
            max_risk_rounds: default_rounds(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Simulate every mutating call. Absent means enabled.
    #[serde(default = "default_test_mode")]
    pub test_mode: bool,
    /// Hand the final decision to the execution engine after each run
    #[serde(default)]
    pub auto_execute: bool,
    /// Pause after a closing order before opening the opposite side
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Pause after the last order before re-reading the position
    #[serde(default = "default_refresh_delay")]
    pub post_trade_refresh_ms: u64,
}

fn default_test_mode() -> bool {
    true
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_refresh_delay() -> u64 {
    2000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            test_mode: default_test_mode(),
            auto_execute: false,
            settle_delay_ms: default_settle_delay(),
            post_trade_refresh_ms: default_refresh_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5000
}

fn default_backoff() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            backoff_factor: default_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    /// Model for analysts, debaters and trader
    #[serde(default = "default_quick_model")]
    pub quick_model: String,
    /// Model for the two judges
    #[serde(default = "default_deep_model")]
    pub deep_model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_quick_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_deep_model() -> String {
    "gpt-4o".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            quick_model: default_quick_model(),
            deep_model: default_deep_model(),
            api_key: String::new(),
            timeout_secs: default_llm_timeout(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// USDⓈ-M futures REST endpoint
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_exchange_timeout() -> u64 {
    15
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: default_recv_window(),
            timeout_secs: default_exchange_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

fn default_results_dir() -> String {
    "./results".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files into this directory
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("trading.symbol", "BTC/USDT")?
            .set_default("trading.position_size", "0.001")?
            .set_default("execution.test_mode", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DESK_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DESK_TRADING__SYMBOL, etc.)
            .add_source(
                Environment::with_prefix("DESK")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(symbol: &str) -> Self {
        use rust_decimal_macros::dec;

        Self {
            trading: TradingConfig {
                symbol: symbol.to_string(),
                timeframe: default_timeframe(),
                leverage: default_leverage(),
                position_size: dec!(0.001),
                lookback_days: None,
            },
            pipeline: PipelineConfig::default(),
            execution: ExecutionConfig::default(),
            retry: RetryConfig::default(),
            llm: LlmConfig::default(),
            exchange: ExchangeConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                json: false,
                dir: None,
            },
        }
    }

    /// Reject configurations that would make a run meaningless or unsafe
    pub fn validate(&self) -> Result<()> {
        if self.trading.symbol.trim().is_empty() {
            return Err(DeskError::Validation("trading.symbol is empty".into()));
        }
        if self.trading.position_size <= Decimal::ZERO {
            return Err(DeskError::Validation(format!(
                "trading.position_size must be positive, got {}",
                self.trading.position_size
            )));
        }
        if !(1..=125).contains(&self.trading.leverage) {
            return Err(DeskError::Validation(format!(
                "trading.leverage must be within 1..=125, got {}",
                self.trading.leverage
            )));
        }
        if self.pipeline.max_debate_rounds == 0 || self.pipeline.max_risk_rounds == 0 {
            return Err(DeskError::Validation(
                "debate and risk rounds must be at least 1".into(),
            ));
        }
        if self.pipeline.max_tool_iterations == 0 {
            return Err(DeskError::Validation(
                "pipeline.max_tool_iterations must be at least 1".into(),
            ));
        }
        if self.pipeline.selected_analysts.is_empty() {
            return Err(DeskError::Validation(
                "pipeline.selected_analysts must name at least one analyst".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self
            .pipeline
            .selected_analysts
            .iter()
            .find(|a| !seen.insert(a.as_str()))
        {
            return Err(DeskError::Validation(format!(
                "pipeline.selected_analysts lists '{}' more than once",
                dup
            )));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(DeskError::Validation(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }
        Ok(())
    }
}
