pub mod address;
pub mod dialect;
pub mod statement;

pub use address::*;
pub use dialect::*;
pub use statement::*;
