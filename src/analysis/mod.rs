//! Pure signal analysis: filtering and heart-rate estimation. No I/O, no
//! threads of its own.

pub mod filter;
pub mod hr;
