// =============================================================================
// Indicator adapters — stateful Indicator wrappers around pure math
// =============================================================================
//
// Each module here wraps one of the teacher's `crate::indicators::*` pure
// functions (or, for `ma_stop`, a new calculation this engine adds) in the
// `Indicator` trait so TA can hold long-lived per-stream instances.
// =============================================================================

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod ma_stop;
pub mod roc;
pub mod rsi;
