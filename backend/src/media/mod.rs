pub mod decoder;

pub use decoder::{DecodeError, FfmpegDecoder, VideoDecoder};
