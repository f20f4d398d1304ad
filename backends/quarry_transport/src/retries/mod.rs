mod core;
mod policy;

pub use self::core::*;
pub use policy::*;
