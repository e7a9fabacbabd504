use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;

use super::{BinanceFuturesClient, ExchangeGateway};

/// Create the runtime exchange gateway from `AppConfig`.
///
/// Credentials are optional here; read-only market endpoints work without
/// them and signed endpoints fail with `DeskError::Auth` at call time.
pub fn build_exchange_gateway(app_config: &AppConfig) -> Result<Arc<dyn ExchangeGateway>> {
    let client = BinanceFuturesClient::new(&app_config.exchange)?;
    info!(
        rest_url = %app_config.exchange.rest_url,
        test_mode = app_config.execution.test_mode,
        "Exchange gateway ready"
    );
    Ok(Arc::new(client))
}
