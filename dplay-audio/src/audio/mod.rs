//! Audio leaf components: packet queue and file source, decoder, converter,
//! clock and the output side of the buffer-queue protocol.

pub mod buffer_queue;
pub mod clock;
pub mod converter;
pub mod decoder;
pub mod output;
pub mod packet_queue;
pub mod source;
pub mod types;

pub use buffer_queue::{BufferQueue, ConsumedCallback};
pub use clock::PlaybackClock;
pub use converter::{ConverterError, SampleFormatConverter};
pub use decoder::{AudioDecoder, SymphoniaDecoder};
pub use output::{
    AudioOutputSink, CpalDevice, DeviceFactory, NullDevice, OutputDevice, SinkContext,
};
pub use packet_queue::PacketQueue;
pub use source::FileSource;
pub use types::{
    pcm_byte_len, ChannelLayout, DecodedFrame, Packet, PcmFormat, SampleFormat,
    StreamDescriptor, TimeBase,
};
