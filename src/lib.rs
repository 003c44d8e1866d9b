//! Records live audio/video streams into FLV files, resumes existing
//! recordings with continuous timestamps, and reports recording durations by
//! reading the last tag of each file.

pub mod config;
pub mod error;
pub mod flv;
pub mod live;
pub mod media;
pub mod mock;
pub mod playback;
pub mod probe;
pub mod recorder;
pub mod service;
pub mod session;
pub mod storage;
pub mod writer;
