//! Stream discovery, connection and background acquisition.
//!
//! - [`source`]: the source/inlet/clock capability and stream selection
//! - [`buffer`]: thread-safe hand-off between acquisition and the scheduler
//! - [`acquirer`]: the dedicated pull thread
//! - [`mock`] and [`replay`]: built-in sources

pub mod acquirer;
pub mod buffer;
pub mod mock;
pub mod replay;
pub mod source;

pub use acquirer::Acquisition;
pub use buffer::StreamBuffer;
pub use source::{connect_stream, AcquisitionClock, SignalSource, StreamInfo, StreamInlet};
