pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, save_config};
pub use schema::{
    AgentDefaults, ApiConfig, Config, GatewayConfig, ModelRef, ProviderConfig, SearchConfig,
    WebConfig,
};
