pub mod binance;
pub mod factory;
mod traits;

pub use binance::BinanceFuturesClient;
pub use factory::build_exchange_gateway;
pub use traits::ExchangeGateway;
