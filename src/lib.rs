pub mod api_football;
pub mod config;
pub mod export;
pub mod fetch;
pub mod http_client;
pub mod model;
pub mod odds_select;
pub mod pipeline;
pub mod report;
pub mod sample;
