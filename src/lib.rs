#![no_std]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod codec;
pub mod extract;
pub mod fs;
pub mod io;
pub mod parser;
pub mod writer;

mod errors;
mod violations;

pub use errors::*;
pub use violations::*;
