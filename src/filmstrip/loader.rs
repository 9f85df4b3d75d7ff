//! Asynchronous filmstrip fetch pipeline. One fetch is in flight per
//! clip at most; scroll events arriving mid-fetch only update the `next`
//! window and are reconciled when the fetch settles. Results are keyed
//! by timestamp, so frames from a superseded window stay valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use eframe::egui;
use image::{imageops, RgbaImage};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use super::layout::THUMB_HEIGHT_PX;
use super::{StripState, ThumbKey};
use crate::ffmpeg::{FrameSource, RawFrame};

/// Upper bound on one batched fetch, decode included
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Pause after a failed fetch before the next attempt
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderEvent {
    FetchFinished,
}

/// Slot for the decode resource; empty until initialization succeeds,
/// emptied again on `set_src`.
pub type SharedSource = Arc<RwLock<Option<Arc<dyn FrameSource>>>>;

pub struct FilmstripLoader {
    fetching: Arc<AtomicBool>,
    source: SharedSource,
    events_tx: Sender<LoaderEvent>,
    last_failure: Arc<Mutex<Option<Instant>>>,
}

impl FilmstripLoader {
    pub fn new(source: SharedSource, events_tx: Sender<LoaderEvent>) -> Self {
        Self {
            fetching: Arc::new(AtomicBool::new(false)),
            source,
            events_tx,
            last_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }

    /// Start a fetch for the `next` window. No-op while a fetch is in
    /// flight, while the decode resource is unavailable, or briefly
    /// after a failed attempt.
    pub fn request(
        &self,
        rt: &Handle,
        ctx: &egui::Context,
        state: &Arc<Mutex<StripState>>,
        ms_per_thumb: f64,
        trim_start_ms: f64,
        max_time_ms: f64,
    ) {
        let Some(source) = self.source.read().clone() else {
            debug!("filmstrip fetch skipped: decode resource not ready");
            return;
        };
        if let Some(at) = *self.last_failure.lock() {
            let elapsed = at.elapsed();
            if elapsed < RETRY_BACKOFF {
                // Keep the render loop alive so the retry actually runs
                // once the backoff expires
                ctx.request_repaint_after(RETRY_BACKOFF.saturating_sub(elapsed));
                return;
            }
        }
        if self.fetching.swap(true, Ordering::SeqCst) {
            return; // at most one fetch in flight
        }

        // Snapshot next -> loading and derive the required timestamps
        let (loading, generation, timestamps_us) = {
            let mut s = state.lock();
            s.loading = s.next;
            let loading = s.loading;

            if loading.thumb_count == 0 {
                self.fetching.store(false, Ordering::SeqCst);
                return;
            }

            let mut timestamps_us = Vec::with_capacity(loading.thumb_count);
            let mut all_cached = true;
            let mut t = loading.start_time_ms + trim_start_ms;
            for _ in 0..loading.thumb_count {
                if t > max_time_ms {
                    break;
                }
                if !s.store.contains(ThumbKey::from_ms(t)) {
                    all_cached = false;
                }
                timestamps_us.push((t * 1000.0) as i64);
                t += ms_per_thumb;
            }

            if all_cached || timestamps_us.is_empty() {
                // Nothing to decode; promote the window right away
                s.current = loading;
                s.dirty = true;
                drop(s);
                self.fetching.store(false, Ordering::SeqCst);
                let _ = self.events_tx.send(LoaderEvent::FetchFinished);
                ctx.request_repaint();
                return;
            }

            (loading, s.generation, timestamps_us)
        };

        let fetching = Arc::clone(&self.fetching);
        let last_failure = Arc::clone(&self.last_failure);
        let events_tx = self.events_tx.clone();
        let state = Arc::clone(state);
        let ctx = ctx.clone();

        rt.spawn(async move {
            let count = timestamps_us.len();
            let fetch =
                tokio::task::spawn_blocking(move || source.thumbnails(&timestamps_us));

            let frames = match tokio::time::timeout(FETCH_TIMEOUT, fetch).await {
                Ok(Ok(Ok(frames))) => Some(frames),
                Ok(Ok(Err(e))) => {
                    warn!("thumbnail fetch failed: {}", e);
                    None
                }
                Ok(Err(e)) => {
                    warn!("thumbnail fetch task aborted: {}", e);
                    None
                }
                Err(_) => {
                    warn!("thumbnail fetch timed out after {:?}", FETCH_TIMEOUT);
                    None
                }
            };

            match frames {
                Some(frames) => {
                    debug!("fetched {}/{} thumbnails", frames.len(), count);

                    // Normalize all frames concurrently; settle before merging
                    let mut handles = Vec::with_capacity(frames.len());
                    for frame in frames {
                        handles.push(tokio::task::spawn_blocking(move || normalize_frame(frame)));
                    }
                    let mut decoded = Vec::with_capacity(handles.len());
                    for handle in handles {
                        match handle.await {
                            Ok(Some(pair)) => decoded.push(pair),
                            // Individual decode failure: slot stays on the
                            // fallback tier and is retried next cycle
                            Ok(None) => {}
                            Err(e) => warn!("thumbnail decode task aborted: {}", e),
                        }
                    }

                    let mut s = state.lock();
                    if s.generation == generation {
                        for (key, img) in decoded {
                            if !s.store.contains(key) {
                                s.store.set(key, img);
                            }
                        }
                        s.current = loading;
                        s.dirty = true;
                        *last_failure.lock() = None;
                    } else {
                        debug!("discarding thumbnails from a superseded source/scale");
                    }
                }
                None => {
                    *last_failure.lock() = Some(Instant::now());
                }
            }

            fetching.store(false, Ordering::SeqCst);
            let _ = events_tx.send(LoaderEvent::FetchFinished);
            ctx.request_repaint();
        });
    }
}

/// Turn a raw RGBA frame into a cache entry, rescaling to the thumbnail
/// height if the source delivered different dimensions.
fn normalize_frame(frame: RawFrame) -> Option<(ThumbKey, RgbaImage)> {
    let key = ThumbKey::from_ms(frame.timestamp_ms as f64);
    let img = RgbaImage::from_raw(frame.width, frame.height, frame.data)?;
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let img = if img.height() != THUMB_HEIGHT_PX {
        let w = ((img.width() as f32 * THUMB_HEIGHT_PX as f32 / img.height() as f32).round()
            as u32)
            .max(1);
        imageops::resize(&img, w, THUMB_HEIGHT_PX, imageops::FilterType::Triangle)
    } else {
        img
    };
    Some((key, img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filmstrip::{layout, SegmentLayout};
    use anyhow::Result;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;

    /// FrameSource stub producing flat gray frames; optionally blocks
    /// until released so tests can hold a fetch open.
    struct StubSource {
        calls: AtomicUsize,
        gate: Option<crossbeam_channel::Receiver<()>>,
    }

    impl StubSource {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), gate: None }
        }

        fn gated() -> (Self, crossbeam_channel::Sender<()>) {
            let (tx, rx) = unbounded();
            (Self { calls: AtomicUsize::new(0), gate: Some(rx) }, tx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for StubSource {
        fn thumbnails(&self, timestamps_us: &[i64]) -> Result<Vec<RawFrame>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            Ok(timestamps_us
                .iter()
                .map(|&ts| RawFrame {
                    timestamp_ms: (ts + 500) / 1000,
                    width: 4,
                    height: THUMB_HEIGHT_PX,
                    data: vec![128; (4 * THUMB_HEIGHT_PX * 4) as usize],
                })
                .collect())
        }
    }

    fn setup(
        source: Arc<dyn FrameSource>,
    ) -> (
        FilmstripLoader,
        SharedSource,
        crossbeam_channel::Receiver<LoaderEvent>,
        Arc<Mutex<StripState>>,
        tokio::runtime::Runtime,
        egui::Context,
    ) {
        let slot: SharedSource = Arc::new(RwLock::new(Some(source)));
        let (tx, rx) = unbounded();
        let loader = FilmstripLoader::new(Arc::clone(&slot), tx);
        let state = Arc::new(Mutex::new(StripState::new()));
        let rt = tokio::runtime::Runtime::new().unwrap();
        (loader, slot, rx, state, rt, egui::Context::default())
    }

    fn window_with(count: usize) -> crate::filmstrip::FilmstripWindow {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let mut win =
            layout::window_for_segment(&layout, 0, 800.0, 100_000.0, 10.0, 1.0);
        win.thumb_count = count;
        win
    }

    #[test]
    fn test_noop_without_source() {
        let stub = Arc::new(StubSource::new());
        let (loader, slot, rx, state, rt, ctx) = setup(stub.clone() as Arc<dyn FrameSource>);
        *slot.write() = None;

        state.lock().next = window_with(4);
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);

        assert!(!loader.is_fetching());
        assert!(rx.try_recv().is_err());
        assert_eq!(stub.calls(), 0);
    }

    #[test]
    fn test_fetch_populates_store_and_promotes() {
        let stub = Arc::new(StubSource::new());
        let (loader, _slot, rx, state, rt, ctx) = setup(stub.clone());

        let win = window_with(4);
        state.lock().next = win;
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let s = state.lock();
        assert_eq!(s.current, win);
        assert!(s.dirty);
        assert!(s.store.contains(ThumbKey::from_ms(0.0)));
        assert!(s.store.contains(ThumbKey::from_ms(3000.0)));
        assert_eq!(stub.calls(), 1);
    }

    #[test]
    fn test_at_most_one_fetch_in_flight() {
        let (stub, release) = StubSource::gated();
        let stub = Arc::new(stub);
        let (loader, _slot, rx, state, rt, ctx) = setup(stub.clone());

        state.lock().next = window_with(4);
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);

        // Wait until the blocking fetch has actually started
        let deadline = Instant::now() + Duration::from_secs(5);
        while stub.calls() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stub.calls(), 1);
        assert!(loader.is_fetching());

        // A second request mid-fetch must not start another fetch
        state.lock().next = window_with(8);
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);
        assert_eq!(stub.calls(), 1);

        release.send(()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!loader.is_fetching());
    }

    #[test]
    fn test_all_cached_promotes_without_fetch() {
        let stub = Arc::new(StubSource::new());
        let (loader, _slot, rx, state, rt, ctx) = setup(stub.clone());

        let win = window_with(2);
        {
            let mut s = state.lock();
            s.next = win;
            let gray = RgbaImage::new(4, THUMB_HEIGHT_PX);
            s.store.set(ThumbKey::from_ms(0.0), gray.clone());
            s.store.set(ThumbKey::from_ms(1000.0), gray);
        }
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(stub.calls(), 0);
        assert_eq!(state.lock().current, win);
    }

    #[test]
    fn test_stale_generation_not_merged() {
        let (stub, release) = StubSource::gated();
        let stub = Arc::new(stub);
        let (loader, _slot, rx, state, rt, ctx) = setup(stub.clone());

        state.lock().next = window_with(3);
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);

        let deadline = Instant::now() + Duration::from_secs(5);
        while stub.calls() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        // Source changed mid-fetch: bump the generation and clear
        {
            let mut s = state.lock();
            s.store.clear_except_fallback();
            s.reset_windows();
        }

        release.send(()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let s = state.lock();
        assert!(!s.store.contains(ThumbKey::from_ms(0.0)));
        assert_eq!(s.current, crate::filmstrip::FilmstripWindow::default());
    }

    #[test]
    fn test_normalize_rescales_to_thumb_height() {
        let frame = RawFrame {
            timestamp_ms: 1500,
            width: 64,
            height: 36,
            data: vec![200; 64 * 36 * 4],
        };
        let (key, img) = normalize_frame(frame).unwrap();
        assert_eq!(key, ThumbKey::Second(2));
        assert_eq!(img.height(), THUMB_HEIGHT_PX);
    }

    #[test]
    fn test_zero_count_window_is_noop() {
        let stub = Arc::new(StubSource::new());
        let (loader, _slot, rx, state, rt, ctx) = setup(stub.clone());

        // next stays default: thumb_count == 0
        loader.request(rt.handle(), &ctx, &state, 1000.0, 0.0, f64::MAX);
        assert!(!loader.is_fetching());
        assert_eq!(stub.calls(), 0);
        assert!(rx.try_recv().is_err());
    }
}
