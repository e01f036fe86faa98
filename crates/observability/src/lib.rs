//! Process-wide logging setup shared by the server binary and tests.

pub mod logging;

pub use logging::{LogFormat, init, init_with};
