//! Pipeline-level test suite.
//!
//! Unit tests live beside the modules they cover; this module holds the
//! shared test utilities and the integration tests that drive the whole
//! wait/capture cycle end to end through the frame transport.


/// Integration tests for the complete pipeline
mod integration_tests;
