pub mod index;
pub mod ivf;
pub mod utils;
