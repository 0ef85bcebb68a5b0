pub mod codec;
pub mod session;

pub use codec::{
    AppCoreRecord, Command, CpuCoreSample, DpdkPortRecord, ReplyHeader, WireRecord,
};
pub use session::{Session, Transport};
