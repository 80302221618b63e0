//! # Audio Processing Module
//!
//! Converts between the capture device's floating-point samples and the
//! little-endian 16-bit PCM blocks that cross the wire.
//!
//! ## Key Components:
//! - **Frame Encoder**: accumulates capture samples into fixed-size frames
//!   and quantizes each full frame to a PCM block
//! - **Playback Decoder**: turns inbound PCM blocks back into float samples
//!   for the output device
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz by default (session configuration)
//! - **Bit Depth**: 16-bit signed PCM
//! - **Channels**: Mono
//! - **Encoding**: Little-endian, no framing header; one WebSocket binary
//!   message per encoded block

pub mod encoder;
pub mod playback;
