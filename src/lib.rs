//! Cost-bounded output caching for rendered Flex pages, and the durable publish queue
//! whose completed jobs invalidate it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
