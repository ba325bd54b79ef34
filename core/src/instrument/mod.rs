pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod layout;

pub use decoder::{FrameDecoder, TriageReport};
pub use encoder::{ChannelRecord, RecordBuilder};
pub use frame::{altitude_grid, ChannelDescriptor, DetectionMode, FrameHeader, RawFrame};
pub use layout::{FieldSpan, HeaderLayout};
