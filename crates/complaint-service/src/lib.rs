pub mod api;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod form;
pub mod geocode;
pub mod state;
pub mod validation;

pub use config::ComplaintServiceConfig;
pub use error::{ComplaintError, ComplaintResult};
pub use state::ComplaintServiceState;
