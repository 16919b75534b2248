pub mod candle_types;

pub use candle_types::{Candle, CandleKey};
