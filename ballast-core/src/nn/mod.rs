pub mod parameter;

pub use parameter::{ParamId, Parameter};
