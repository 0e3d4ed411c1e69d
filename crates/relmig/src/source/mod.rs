//! Built-in sources.
//!
//! Database drivers are registered by the embedding application through the
//! [`ServiceCatalog`](crate::core::ServiceCatalog); the crate itself ships a
//! flat dump source for offline migrations and tests.

mod dump;

pub use dump::{DumpFile, DumpSource};
