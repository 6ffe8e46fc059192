//! Type definitions for the trust core.

pub mod entities;
pub mod enums;
pub mod exchange;

pub use entities::*;
pub use enums::*;
pub use exchange::*;
