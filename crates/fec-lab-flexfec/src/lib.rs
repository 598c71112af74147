pub mod bus;
pub mod decoder;
pub mod encoder;
pub mod header;

pub use bus::RuntimeBus;
pub use decoder::FlexFec03Decoder;
pub use encoder::{CoverageMode, FecEncoder, RuntimeConfig};
pub use header::{parse_repair, FlexFecError, RepairHeader};
