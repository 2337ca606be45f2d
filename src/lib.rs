//! Screen recorder core: a countdown-gated capture session that buffers an
//! encoded stream and hands the result to a sequential multi-format transcoder.

pub mod capture;
pub mod controller;
pub mod countdown;
pub mod delivery;
pub mod error;
pub mod ffmpeg;
pub mod session;
pub mod settings;
pub mod shortcut;
pub mod transcode;

#[cfg(test)]
mod testing;
