pub mod executor;
pub mod publisher;
pub mod services;
pub mod strategy;
