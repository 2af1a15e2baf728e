//
// ZModem protocol specification http://cristal.inria.fr/~doligez/zmodem/zmodem.txt

pub mod constants;
pub use constants::*;

mod escape;
pub use escape::*;

mod header;
pub use header::*;

mod decoder;
pub use decoder::*;

mod subpacket;
pub use subpacket::*;

mod rz;
pub use rz::*;
