//! Signal containers and recording persistence.

pub mod chunk;
pub mod event_log;
pub mod storage;

pub use chunk::SignalChunk;
pub use event_log::{EventLog, EventRecord};
pub use storage::{CsvRecordingWriter, MemorySink, Recording, RecordingSink};
