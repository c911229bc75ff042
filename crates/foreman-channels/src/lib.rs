pub mod api;
pub mod base;
pub mod manager;
pub mod web;
mod web_assets;

pub use api::ApiChannel;
pub use base::Channel;
pub use manager::ChannelManager;
pub use web::WebChannel;
