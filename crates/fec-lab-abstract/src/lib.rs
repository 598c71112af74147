pub mod packet;
pub mod rng;
pub mod scenario;
pub mod schedule;

pub use packet::{is_newer_seq, seq_diff, Header, Packet, HEADER_LEN};
pub use scenario::{LinkSpec, LossSpec, Mode, RtpIds, Scenario, SenderSpec};
pub use schedule::{FloatPoint, FloatSchedule};
