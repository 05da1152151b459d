pub mod alarm;
pub mod config;
pub mod run;
mod runtime;
