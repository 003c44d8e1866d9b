//! In-process live source: publishers push tracks and frames for a named
//! stream, subscribers wait for tracks and then drain frames in order.
//!
//! Every subscriber owns an unbounded queue fed by `Publisher::push`, so a
//! slow consumer delays its own frames but never loses any.

use crate::error::{RecordError, RecordResult};
use crate::media::{AudioCodec, AudioTrack, Frame, VideoCodec, VideoTrack};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};

type StreamMap = HashMap<String, Arc<StreamSlot>>;

/// Where a publisher's frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOrigin {
    /// An external live source
    Live,
    /// A stored recording being replayed
    Playback,
}

/// Lifecycle callbacks invoked synchronously by the hub.
pub trait StreamHooks: Send + Sync {
    /// A publisher was attached to `stream_id`.
    fn on_publish(&self, hub: &StreamHub, stream_id: &str, origin: PublishOrigin);

    /// Someone asked to subscribe to `stream_id`. Runs before the lookup, so a
    /// hook may attach a publisher that the subscription will then find.
    fn on_subscribe(&self, hub: &StreamHub, stream_id: &str, has_publisher: bool);
}

struct StreamSlot {
    audio: watch::Sender<Option<AudioTrack>>,
    video: watch::Sender<Option<VideoTrack>>,
    /// `None` once the publisher is gone; dropping the senders ends every queue
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<Frame>>>>,
    ended: watch::Sender<bool>,
}

impl StreamSlot {
    fn is_live(&self) -> bool {
        !*self.ended.borrow()
    }

    fn subscribers(&self) -> MutexGuard<'_, Option<Vec<mpsc::UnboundedSender<Frame>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        let mut subscribers = self.subscribers();
        let list = subscribers.as_mut()?;
        let (tx, rx) = mpsc::unbounded_channel();
        list.push(tx);
        Some(rx)
    }
}

#[derive(Clone, Default)]
pub struct StreamHub {
    streams: Arc<Mutex<StreamMap>>,
    hooks: Arc<RwLock<Option<Arc<dyn StreamHooks>>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hooks(&self, hooks: Arc<dyn StreamHooks>) {
        *self.hooks.write().unwrap_or_else(PoisonError::into_inner) = Some(hooks);
    }

    fn streams(&self) -> MutexGuard<'_, StreamMap> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> Option<Arc<dyn StreamHooks>> {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_published(&self, stream_id: &str) -> bool {
        self.streams().get(stream_id).is_some_and(|slot| slot.is_live())
    }

    /// Attach a live publisher. A stream has at most one live publisher.
    pub fn publish(&self, stream_id: &str) -> RecordResult<Publisher> {
        self.publish_as(stream_id, PublishOrigin::Live)
    }

    pub fn publish_as(&self, stream_id: &str, origin: PublishOrigin) -> RecordResult<Publisher> {
        let slot = {
            let mut streams = self.streams();
            if streams.get(stream_id).is_some_and(|slot| slot.is_live()) {
                return Err(RecordError::AlreadyPublished(stream_id.to_string()));
            }
            let slot = Arc::new(StreamSlot {
                audio: watch::channel(None).0,
                video: watch::channel(None).0,
                subscribers: Mutex::new(Some(Vec::new())),
                ended: watch::channel(false).0,
            });
            streams.insert(stream_id.to_string(), slot.clone());
            slot
        };
        tracing::info!("stream {} published ({:?})", stream_id, origin);

        if let Some(hooks) = self.hooks() {
            hooks.on_publish(self, stream_id, origin);
        }
        Ok(Publisher { stream_id: stream_id.to_string(), slot, streams: self.streams.clone() })
    }

    /// Attach to a live stream. Fails immediately when nothing is published.
    pub fn subscribe(&self, stream_id: &str) -> RecordResult<Subscription> {
        if let Some(hooks) = self.hooks() {
            hooks.on_subscribe(self, stream_id, self.is_published(stream_id));
        }

        let streams = self.streams();
        let (slot, frames) = streams
            .get(stream_id)
            .filter(|slot| slot.is_live())
            .and_then(|slot| Some((slot, slot.attach()?)))
            .ok_or_else(|| RecordError::SubscriptionFailure(stream_id.to_string()))?;

        let (detach_tx, detach_rx) = watch::channel(false);
        Ok(Subscription {
            stream_id: stream_id.to_string(),
            audio: slot.audio.subscribe(),
            video: slot.video.subscribe(),
            frames,
            ended: slot.ended.subscribe(),
            detach: detach_rx,
            handle: SubscriptionHandle { detach: Arc::new(detach_tx) },
        })
    }
}

/// Producer side of a stream. Dropping it ends the stream.
pub struct Publisher {
    stream_id: String,
    slot: Arc<StreamSlot>,
    streams: Arc<Mutex<StreamMap>>,
}

impl Publisher {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn set_audio_track(&self, track: AudioTrack) {
        self.slot.audio.send_replace(Some(track));
    }

    pub fn set_video_track(&self, track: VideoTrack) {
        self.slot.video.send_replace(Some(track));
    }

    /// Queue `frame` for every current subscriber.
    pub fn push(&self, frame: Frame) {
        if let Some(subscribers) = self.slot.subscribers().as_mut() {
            // a failed send means that subscriber was dropped
            subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        }
    }

    pub fn finish(self) {}
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.slot.ended.send_replace(true);
        self.slot.subscribers().take();

        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        // a newer publisher may already own the id
        if streams.get(&self.stream_id).is_some_and(|slot| Arc::ptr_eq(slot, &self.slot)) {
            streams.remove(&self.stream_id);
        }
        tracing::info!("stream {} ended", self.stream_id);
    }
}

/// Cloneable detach signal for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    detach: Arc<watch::Sender<bool>>,
}

impl SubscriptionHandle {
    /// Ask the subscriber to stop after the frame it is currently handling.
    pub fn close(&self) {
        self.detach.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.detach.borrow()
    }

    pub fn same_subscription(&self, other: &SubscriptionHandle) -> bool {
        Arc::ptr_eq(&self.detach, &other.detach)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The publisher went away
    Ended,
    /// `SubscriptionHandle::close` was called
    Detached,
}

pub struct Subscription {
    stream_id: String,
    audio: watch::Receiver<Option<AudioTrack>>,
    video: watch::Receiver<Option<VideoTrack>>,
    frames: mpsc::UnboundedReceiver<Frame>,
    ended: watch::Receiver<bool>,
    detach: watch::Receiver<bool>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    fn stopped(&self) -> bool {
        *self.ended.borrow() || *self.detach.borrow()
    }

    /// Wait for the audio track. `None` if the stream ends, the subscription
    /// is detached, or the published codec is not one of `accepted`.
    pub async fn wait_audio_track(&mut self, accepted: &[AudioCodec]) -> Option<AudioTrack> {
        loop {
            let current = self.audio.borrow_and_update().clone();
            if let Some(track) = current {
                if accepted.contains(&track.codec) {
                    return Some(track);
                }
                tracing::warn!("stream {}: audio codec {} not accepted", self.stream_id, track.codec);
                return None;
            }
            if self.stopped() {
                return None;
            }
            tokio::select! {
                r = self.audio.changed() => if r.is_err() { return None },
                r = self.ended.changed() => if r.is_err() { return None },
                r = self.detach.changed() => if r.is_err() { return None },
            }
        }
    }

    pub async fn wait_video_track(&mut self, accepted: &[VideoCodec]) -> Option<VideoTrack> {
        loop {
            let current = self.video.borrow_and_update().clone();
            if let Some(track) = current {
                if accepted.contains(&track.codec) {
                    return Some(track);
                }
                tracing::warn!("stream {}: video codec {} not accepted", self.stream_id, track.codec);
                return None;
            }
            if self.stopped() {
                return None;
            }
            tokio::select! {
                r = self.video.changed() => if r.is_err() { return None },
                r = self.ended.changed() => if r.is_err() { return None },
                r = self.detach.changed() => if r.is_err() { return None },
            }
        }
    }

    /// Hand every frame to `on_frame` in delivery order until the stream ends
    /// or the subscription is detached. An error from `on_frame` stops playback.
    ///
    /// Frames queued before the publisher went away are all delivered before
    /// `PlayOutcome::Ended` is returned.
    pub async fn play<F>(mut self, mut on_frame: F) -> RecordResult<PlayOutcome>
    where
        F: FnMut(Frame) -> RecordResult<()>,
    {
        loop {
            if *self.detach.borrow() {
                return Ok(PlayOutcome::Detached);
            }
            tokio::select! {
                biased;
                _ = self.detach.changed() => {}
                frame = self.frames.recv() => match frame {
                    Some(frame) => on_frame(frame)?,
                    None => return Ok(PlayOutcome::Ended),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AudioFrame;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn audio(ts: u32) -> Frame {
        Frame::Audio(AudioFrame { timestamp: ts, data: Bytes::from_static(b"x") })
    }

    #[tokio::test]
    async fn test_subscribe_unknown_stream_fails() {
        let hub = StreamHub::new();
        assert!(matches!(hub.subscribe("nobody"), Err(RecordError::SubscriptionFailure(_))));
    }

    #[tokio::test]
    async fn test_single_publisher_per_stream() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        assert!(matches!(hub.publish("cam1"), Err(RecordError::AlreadyPublished(_))));
        publisher.finish();
        assert!(!hub.is_published("cam1"));
        let _again = hub.publish("cam1")?;
        Ok(())
    }

    #[tokio::test]
    async fn test_tracks_and_frames_in_order() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let mut sub = hub.subscribe("cam1")?;

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.set_audio_track(AudioTrack::aac(44_100, 2, vec![0x12, 0x10]));
            publisher.set_video_track(VideoTrack::h264(vec![0x01]));
            for ts in [0, 20, 40] {
                publisher.push(audio(ts));
            }
        });

        let track = sub.wait_audio_track(&[AudioCodec::Aac]).await;
        assert_eq!(track.map(|t| t.codec), Some(AudioCodec::Aac));
        assert!(sub.wait_video_track(&[VideoCodec::H264]).await.is_some());
        producer.await?;

        let mut seen = Vec::new();
        let outcome = sub
            .play(|frame| {
                seen.push(frame.timestamp());
                Ok(())
            })
            .await?;
        assert_eq!(outcome, PlayOutcome::Ended);
        assert_eq!(seen, vec![0, 20, 40]);
        Ok(())
    }

    #[tokio::test]
    async fn test_burst_is_delivered_without_loss() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let fast = hub.subscribe("cam1")?;
        let slow = hub.subscribe("cam1")?;

        // nothing is consuming while the burst is pushed
        for ts in 0..5_000 {
            publisher.push(audio(ts));
        }
        publisher.finish();

        for sub in [fast, slow] {
            let mut seen = Vec::new();
            let outcome = sub
                .play(|frame| {
                    seen.push(frame.timestamp());
                    Ok(())
                })
                .await?;
            assert_eq!(outcome, PlayOutcome::Ended);
            assert_eq!(seen, (0..5_000).collect::<Vec<u32>>());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let sub = hub.subscribe("cam1")?;
        let _kept = hub.subscribe("cam1")?;
        drop(sub);

        publisher.push(audio(0));
        let queues = publisher.slot.subscribers().as_ref().map(Vec::len);
        assert_eq!(queues, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_ended_stream_slot_is_removed() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let first = hub.publish("cam1")?;
        let _other = hub.publish("cam2")?;
        first.finish();
        assert!(!hub.streams().contains_key("cam1"));
        assert_eq!(hub.streams().len(), 1);

        // a stale slot must not evict the publisher that replaced it
        let second = hub.publish("cam1")?;
        let stale = Publisher {
            stream_id: "cam1".to_string(),
            slot: Arc::new(StreamSlot {
                audio: watch::channel(None).0,
                video: watch::channel(None).0,
                subscribers: Mutex::new(None),
                ended: watch::channel(true).0,
            }),
            streams: hub.streams.clone(),
        };
        drop(stale);
        assert!(hub.is_published("cam1"));
        drop(second);
        assert!(hub.streams().get("cam1").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_after_end_fails() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        hub.publish("cam1")?.finish();
        assert!(matches!(hub.subscribe("cam1"), Err(RecordError::SubscriptionFailure(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_returns_none_when_stream_ends() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let mut sub = hub.subscribe("cam1")?;
        publisher.finish();
        assert!(sub.wait_audio_track(&[AudioCodec::Aac]).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unaccepted_codec_is_rejected() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        publisher.set_audio_track(AudioTrack::g711(AudioCodec::Pcmu, 8_000, 1));
        let mut sub = hub.subscribe("cam1")?;
        assert!(sub.wait_audio_track(&[AudioCodec::Aac]).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_detach_stops_play() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let sub = hub.subscribe("cam1")?;
        let handle = sub.handle();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = tokio::spawn(sub.play(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        publisher.push(audio(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();
        assert!(handle.is_closed());

        let outcome = task.await??;
        assert_eq!(outcome, PlayOutcome::Detached);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(publisher);
        Ok(())
    }

    #[tokio::test]
    async fn test_callback_error_stops_play() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let publisher = hub.publish("cam1")?;
        let sub = hub.subscribe("cam1")?;
        publisher.push(audio(0));
        publisher.push(audio(20));

        let result = sub.play(|_| Err(RecordError::WriterClosed)).await;
        assert!(matches!(result, Err(RecordError::WriterClosed)));
        Ok(())
    }

    #[derive(Default)]
    struct CountingHooks {
        published: AtomicUsize,
        subscribed: AtomicUsize,
        publishers: Mutex<Vec<Publisher>>,
    }

    impl StreamHooks for CountingHooks {
        fn on_publish(&self, _hub: &StreamHub, _stream_id: &str, _origin: PublishOrigin) {
            self.published.fetch_add(1, Ordering::SeqCst);
        }

        fn on_subscribe(&self, hub: &StreamHub, stream_id: &str, has_publisher: bool) {
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            if !has_publisher {
                if let Ok(p) = hub.publish(stream_id) {
                    self.publishers.lock().unwrap().push(p);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_hook_can_attach_publisher() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let hooks = Arc::new(CountingHooks::default());
        hub.set_hooks(hooks.clone());

        let sub = hub.subscribe("vod/clip")?;
        assert_eq!(sub.stream_id(), "vod/clip");
        assert_eq!(hooks.subscribed.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.published.load(Ordering::SeqCst), 1);
        Ok(())
    }

    struct OriginHooks {
        seen: Mutex<Vec<PublishOrigin>>,
    }

    impl StreamHooks for OriginHooks {
        fn on_publish(&self, _hub: &StreamHub, _stream_id: &str, origin: PublishOrigin) {
            self.seen.lock().unwrap().push(origin);
        }

        fn on_subscribe(&self, _hub: &StreamHub, _stream_id: &str, _has_publisher: bool) {}
    }

    #[tokio::test]
    async fn test_publish_origin_reaches_hook() -> anyhow::Result<()> {
        let hub = StreamHub::new();
        let hooks = Arc::new(OriginHooks { seen: Mutex::new(Vec::new()) });
        hub.set_hooks(hooks.clone());

        let _live = hub.publish("cam1")?;
        let _replay = hub.publish_as("vod/clip", PublishOrigin::Playback)?;
        assert_eq!(*hooks.seen.lock().unwrap(), vec![PublishOrigin::Live, PublishOrigin::Playback]);
        Ok(())
    }
}
