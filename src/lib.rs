//! Building blocks for load testing a Nice protocol endpoint.
//!
//! - `protocol`: frame encoding and the accumulate-until-N read primitive
//! - `client`: one framed request/response per connection
//! - `schedule`: time-phased target user counts and ramp arithmetic
//! - `driver`: the simulated user pool
//! - `metrics`: request outcomes and their aggregation
//! - `mock`: a stand-in for the Nice backend
//! - `probe`: the manual diagnostic request

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod payload;
pub mod probe;
pub mod protocol;
pub mod schedule;
