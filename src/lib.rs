pub mod ai_provider;
pub mod audit;
pub mod cli;
pub mod config;
pub mod corrections;
pub mod dual;
pub mod error;
pub mod near_misses;
pub mod oracle;
pub mod pipeline;
pub mod reports;
pub mod validator;
