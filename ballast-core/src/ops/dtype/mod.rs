pub mod cast;

pub use cast::{bf16_to_f32, round_bf16_nearest, round_bf16_stochastic};
