//! Node variants

pub mod gain;
pub mod noise;
pub mod sink;
pub mod stream;

pub use gain::{db_to_linear, GainNode};
pub use noise::WhiteNoiseNode;
pub use sink::{DeviceSinkNode, SinkTap};
pub use stream::{IngestOptions, StreamIngestNode};
