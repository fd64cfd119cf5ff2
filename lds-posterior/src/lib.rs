pub mod cli;
pub mod dynamics;
pub mod encoder;
pub mod lds;
pub mod posterior;

pub use candle_core;
pub use candle_nn;
