//! YMODEM batch receive.
//!
//! specification: http://pauillac.inria.fr/~doligez/zmodem/ymodem.txt

pub mod constants;

mod packet;
pub use packet::*;

mod ry;
pub use ry::*;
