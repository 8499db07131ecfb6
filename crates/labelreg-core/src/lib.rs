pub mod error;
pub mod geometry;
pub mod image;
pub mod window;

pub use error::{CoreError, Result};
pub use geometry::ImageGeometry;
pub use image::Image;
pub use window::WindowShape;
