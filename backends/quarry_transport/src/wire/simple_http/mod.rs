pub mod client;
mod codec;
mod errors;
mod impls;

pub use codec::*;
pub use errors::*;
pub use impls::*;
