//! Command handlers

pub mod run;
pub mod scenarios;
