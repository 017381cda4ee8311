//! Test-only scaffolding shared across unit and integration tests.

pub mod mock_server;
