//! House price estimation for the Kathmandu market: a trainer that fits a
//! non-negative linear model from historical sales, and an estimator that
//! prices queries and surfaces comparable listings.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod valuation;
