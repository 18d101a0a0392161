mod cursor;
mod read;
mod write;
mod writer_bytewise;

pub use cursor::*;
pub use read::*;
pub use write::*;
pub use writer_bytewise::*;
