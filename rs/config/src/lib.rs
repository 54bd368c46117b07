pub mod enums;
pub mod ivf;
pub mod search_params;
