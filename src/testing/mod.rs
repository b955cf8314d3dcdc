//! Testing utilities and mock implementations
//!
//! Provides scripted broker mocks so the connection lifecycle can be driven
//! without a real broker.

pub mod mocks;
