mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod clock;
pub mod config;
pub mod feedback;
pub mod intake;
pub mod pipeline;
pub mod predictor;
pub mod staging;

pub use app::start_app;
