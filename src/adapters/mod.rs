pub mod memory;
pub mod rest;

pub use memory::{Fixture, InMemoryBackend};
pub use rest::RestBackend;
