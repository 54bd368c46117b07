pub mod builder;
pub mod cluster;
pub mod index;
pub mod reader;
pub mod writer;

pub const CONFIG_FILE_NAME: &str = "ivf_rabitq_config.yaml";
pub const INDEX_FILE_NAME: &str = "index";
