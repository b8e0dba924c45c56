pub mod codec;
pub mod integrate;

pub use codec::*;
pub use integrate::*;
