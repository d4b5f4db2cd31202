//! Deterministic conversion of relative day/clock expressions into absolute
//! instants anchored to a fixed civil timezone.
//!
//! Nothing here consults the host's local timezone: every wall-clock value is
//! obtained by rendering an absolute instant through `chrono-tz`.

pub mod clock;
pub mod resolver;
pub mod tokens;

pub use clock::*;
pub use resolver::*;
pub use tokens::*;
