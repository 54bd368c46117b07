//! RaBitQ codec: sign codes plus optional extended bits, with the per-vector factors needed to
//! turn a code/query inner product into a distance estimate.

pub mod code;
pub mod config;
pub mod quantizer;

pub use code::{BinaryCode, BinaryCodeRef, ExCode, ExCodeRef, FullCode, SplitCode};
pub use self::config::RabitqConfig;
pub use quantizer::{quantize_full_single, quantize_split_single, reconstruct_vec};
