pub mod api;
pub mod metrics;
pub mod serve;
pub mod state;
