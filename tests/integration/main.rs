//! Integration test target: daemon scenarios over an in-memory marketplace.

mod daemon_scenarios;
mod mock_marketplace;
