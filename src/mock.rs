use crate::error::RecordResult;
use crate::live::StreamHub;
use crate::media::{AudioFrame, AudioTrack, Frame, VideoFrame, VideoTrack};
use bytes::Bytes;
use std::time::Duration;
use tokio::task::JoinHandle;

const TICK_MS: u32 = 20;
const KEYFRAME_INTERVAL: u64 = 50;

/// AudioSpecificConfig: AAC-LC, 44.1kHz, stereo
const AAC_CONFIG: [u8; 2] = [0x12, 0x10];
/// AVCDecoderConfigurationRecord for a baseline stream with one SPS/PPS pair
const AVC_CONFIG: [u8; 23] = [
    0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x08, 0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x00, 0xA0, 0x47, 0x01, 0x00,
    0x04, 0x68, 0xCE, 0x3C, 0x80,
];

/// Publish a synthetic AAC + H.264 stream on the hub: one audio frame every
/// 20ms and one video frame every 40ms. Runs until `frames` ticks have been
/// produced, or forever when `None`.
pub fn start_mock_source(hub: &StreamHub, stream_id: &str, frames: Option<u64>) -> RecordResult<JoinHandle<()>> {
    let publisher = hub.publish(stream_id)?;
    publisher.set_audio_track(AudioTrack::aac(44_100, 2, AAC_CONFIG.to_vec()));
    publisher.set_video_track(VideoTrack::h264(AVC_CONFIG.to_vec()));
    tracing::info!("starting mock source on stream {}", stream_id);

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS as u64));
        let mut tick: u64 = 0;
        while frames.map_or(true, |n| tick < n) {
            ticker.tick().await;
            let ts = (tick as u32).wrapping_mul(TICK_MS);

            publisher.push(Frame::Audio(AudioFrame { timestamp: ts, data: Bytes::from(vec![0x21; 16]) }));
            if tick % 2 == 0 {
                let keyframe = tick % KEYFRAME_INTERVAL == 0;
                let nal_type = if keyframe { 0x65 } else { 0x41 };
                publisher.push(Frame::Video(VideoFrame {
                    timestamp: ts,
                    keyframe,
                    composition_time: 0,
                    data: Bytes::from(vec![0, 0, 0, 4, nal_type, 0x88, 0x84, 0x00]),
                }));
            }

            tick += 1;
            if tick % 500 == 0 {
                tracing::debug!("mock source {}: {} ticks", publisher.stream_id(), tick);
            }
        }
        publisher.finish();
    }))
}
