//! Ready-made namespaces for common server surfaces.

pub mod fs;
