//! Sequential frame access to stored trail-camera clips.

pub mod source;

pub use ffmpeg_next::init;
pub use source::{Frame, FrameError, OpenError, VideoSource};
