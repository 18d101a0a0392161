mod builder;
mod gz_writer;
mod tar_writer;

pub use builder::*;
pub use gz_writer::*;
pub use tar_writer::*;
