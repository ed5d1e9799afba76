pub mod application;
pub mod endpoints;
pub mod services;

// Re-export from application for convenience
pub use application::bootstrapper;
pub use application::config;
pub use application::error;
pub use application::state;
