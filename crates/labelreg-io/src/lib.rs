pub mod nifti_io;

pub use nifti_io::{is_nifti_path, read_nifti, write_nifti};
