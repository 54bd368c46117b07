pub mod error;
pub mod estimator;
pub mod fastscan;
pub mod rabitq;
pub mod rotator;
