//! Backend implementations of the loader interfaces.

pub mod sqlite;
