/// Host file persistence.
mod image;
/// The block pool.
mod pool;

pub use image::*;
pub use pool::*;
