pub mod engine;
pub mod link;
pub mod loss;
pub mod receiver;
pub mod recorder;
pub mod result;
pub mod scenarios;
pub mod summary;

pub use engine::{run_scenario, RunOptions, SimError};
pub use link::{DeliveredPacket, DropReason, Link, SendOutcome};
pub use loss::{build_loss_model, LossModel, PacketMeta};
pub use receiver::{Receiver, ReceiverSnapshot};
pub use recorder::{CsvRecorder, MemoryRecorder, MultiRecorder, Recorder, SummaryRecorder, TimeSample};
pub use result::RunResult;
pub use summary::{SummaryCsvWriter, SummaryRow};
