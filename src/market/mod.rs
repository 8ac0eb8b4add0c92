pub mod alerts;
pub mod analytics;
pub mod binance;
pub mod book;
pub mod history;
pub mod pipeline;
pub mod types;
