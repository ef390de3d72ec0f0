//! Common test utilities and fixtures.

pub mod engine;
pub mod fixtures;
pub mod locations;

#[allow(unused_imports)]
pub use engine::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use locations::*;
