//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - The DTOs used to insert or filter rows

pub mod progress;
pub mod prompt;
pub mod run;
pub mod status;
