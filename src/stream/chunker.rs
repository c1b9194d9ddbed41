//! Windowing of conditioned audio into overlapping chunks.
//!
//! [`ChunkBuffer`] owns two buffers:
//!
//! * **raw**: conditioned samples not yet placed in a window;
//! * **overlap**: the tail of the last assembled window, replayed as the
//!   head of the next one so the transcriber keeps context across chunks.
//!
//! With the default 5 s window, 2 s overlap and 3 s trigger every window is
//! `2 s overlap + 3 s new audio`:
//!
//! ```text
//! window n    [ ov(n-1) |      new       ]
//! window n+1             [ ov(n) |      new       ]
//! ```
//!
//! A window is assembled only when the raw buffer holds at least the
//! trigger amount, overlap + raw covers a full window, no other assembly is
//! in flight, and the minimum interval since the last successful send has
//! elapsed.  The very first window has no overlap to lean on, so it waits
//! for a full window of raw audio.
//!
//! Silent windows are discarded after the buffers have rotated, so the same
//! silence is never reconsidered.

use std::time::{Duration, Instant};

use crate::config::ChunkingConfig;

// ---------------------------------------------------------------------------
// ChunkParams
// ---------------------------------------------------------------------------

/// Chunking parameters in samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkParams {
    pub window: usize,
    pub trigger: usize,
    pub overlap: usize,
    pub min_interval: Duration,
    /// Fraction of full scale (`0x7FFF`) below which a sample is silent.
    pub silence_threshold: f32,
}

impl ChunkParams {
    pub fn from_config(config: &ChunkingConfig, sample_rate: u32) -> Self {
        let samples = |secs: f32| (secs.max(0.0) * sample_rate as f32).round() as usize;
        let window = samples(config.window_secs).max(1);
        Self {
            window,
            trigger: samples(config.trigger_secs),
            // at least one new sample per window
            overlap: samples(config.overlap_secs).min(window - 1),
            min_interval: Duration::from_millis(config.min_interval_ms),
            silence_threshold: config.silence_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Window / ChunkStats
// ---------------------------------------------------------------------------

/// A full-length chunk ready for transmission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    /// Count of windows assembled before this one, silent ones included.
    pub index: u64,
    pub samples: Vec<i16>,
}

/// Running totals for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub sent: u64,
    /// Suppressed because every sample was below the silence threshold.
    pub silent: u64,
    /// Not delivered because the channel was closed or full.
    pub dropped: u64,
}

// ---------------------------------------------------------------------------
// ChunkBuffer
// ---------------------------------------------------------------------------

pub struct ChunkBuffer {
    params: ChunkParams,
    raw: Vec<i16>,
    overlap: Vec<i16>,
    in_flight: bool,
    last_sent: Option<Instant>,
    next_index: u64,
    stats: ChunkStats,
}

impl ChunkBuffer {
    pub fn new(params: ChunkParams) -> Self {
        Self {
            raw: Vec::with_capacity(params.window * 2),
            overlap: Vec::with_capacity(params.overlap),
            params,
            in_flight: false,
            last_sent: None,
            next_index: 0,
            stats: ChunkStats::default(),
        }
    }

    /// Append conditioned samples and assemble a window if one is due.
    ///
    /// Returns `None` when nothing is due or the assembled window was
    /// silent.  The returned [`PendingWindow`] must be resolved with
    /// [`PendingWindow::finish`]; until then no other window can be
    /// assembled.
    pub fn push(&mut self, samples: &[i16], now: Instant) -> Option<PendingWindow<'_>> {
        self.raw.extend_from_slice(samples);

        if !self.is_due(now) {
            return None;
        }

        self.in_flight = true;
        let window = self.assemble();

        if self.is_silent(&window.samples) {
            log::debug!("window {} is silent, not sending", window.index);
            self.stats.silent += 1;
            self.in_flight = false;
            return None;
        }

        Some(PendingWindow {
            buffer: self,
            window,
            resolved: false,
        })
    }

    fn is_due(&self, now: Instant) -> bool {
        let p = &self.params;
        !self.in_flight
            && self.raw.len() >= p.trigger
            && self.overlap.len() + self.raw.len() >= p.window
            && self
                .last_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= p.min_interval)
    }

    /// Build `overlap ++ raw[..n]` of exactly `window` samples, then rotate
    /// both buffers.
    fn assemble(&mut self) -> Window {
        let window_len = self.params.window;
        let from_raw = (window_len - self.overlap.len()).min(self.raw.len());

        let mut samples = Vec::with_capacity(window_len);
        samples.extend_from_slice(&self.overlap);
        samples.extend(self.raw.drain(..from_raw));
        debug_assert_eq!(samples.len(), window_len);

        let tail = samples.len().saturating_sub(self.params.overlap);
        self.overlap.clear();
        self.overlap.extend_from_slice(&samples[tail..]);

        let index = self.next_index;
        self.next_index += 1;
        Window { index, samples }
    }

    fn is_silent(&self, samples: &[i16]) -> bool {
        let limit = self.params.silence_threshold * 32_767.0;
        samples.iter().all(|&s| ((s as i32).abs() as f32) < limit)
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    pub fn overlap(&self) -> &[i16] {
        &self.overlap
    }

    pub fn is_assembling(&self) -> bool {
        self.in_flight
    }

    pub fn stats(&self) -> ChunkStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// PendingWindow
// ---------------------------------------------------------------------------

/// A window handed out by [`ChunkBuffer::push`] and not yet resolved.
///
/// Dropping it unresolved counts the window as dropped and releases the
/// buffer for the next assembly.
pub struct PendingWindow<'a> {
    buffer: &'a mut ChunkBuffer,
    window: Window,
    resolved: bool,
}

impl PendingWindow<'_> {
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Record the outcome of the send.  Only a successful send restarts the
    /// minimum-interval clock.
    pub fn finish(mut self, sent: bool, now: Instant) -> Window {
        self.resolved = true;
        let window = std::mem::take(&mut self.window);
        if sent {
            self.buffer.last_sent = Some(now);
            self.buffer.stats.sent += 1;
        } else {
            self.buffer.stats.dropped += 1;
        }
        window
    }
}

impl Drop for PendingWindow<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.buffer.stats.dropped += 1;
        }
        self.buffer.in_flight = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 16_000;

    fn buffer() -> ChunkBuffer {
        ChunkBuffer::new(ChunkParams::from_config(&ChunkingConfig::default(), 16_000))
    }

    fn samples(secs: f32) -> usize {
        (secs * RATE as f32).round() as usize
    }

    fn tone_n(len: usize, start: usize) -> Vec<i16> {
        // distinct values so positions can be traced through windows
        (0..len).map(|i| 1_000 + ((start + i) % 20_000) as i16).collect()
    }

    fn tone(secs: f32, start: usize) -> Vec<i16> {
        tone_n(samples(secs), start)
    }

    fn silence(secs: f32) -> Vec<i16> {
        vec![0; samples(secs)]
    }

    fn push_and_send(buf: &mut ChunkBuffer, samples: &[i16], now: Instant) -> Option<Window> {
        buf.push(samples, now).map(|p| p.finish(true, now))
    }

    #[test]
    fn params_from_defaults() {
        let p = ChunkParams::from_config(&ChunkingConfig::default(), 16_000);
        assert_eq!(p.window, 80_000);
        assert_eq!(p.trigger, 48_000);
        assert_eq!(p.overlap, 32_000);
        assert_eq!(p.min_interval, Duration::from_millis(500));
    }

    #[test]
    fn overlap_never_swallows_the_whole_window() {
        let config = ChunkingConfig {
            trigger_secs: 0.0,
            overlap_secs: 5.0,
            min_interval_ms: 0,
            ..ChunkingConfig::default()
        };
        let params = ChunkParams::from_config(&config, 16_000);
        assert_eq!(params.overlap, 79_999);

        let mut buf = ChunkBuffer::new(params);
        let t0 = Instant::now();
        let w0 = push_and_send(&mut buf, &tone(5.0, 0), t0).expect("first window");
        // with no new audio nothing is resent
        assert!(push_and_send(&mut buf, &[], t0 + Duration::from_secs(1)).is_none());
        let w1 = push_and_send(&mut buf, &[7_000], t0 + Duration::from_secs(2)).expect("next");
        assert_eq!(&w1.samples[..79_999], &w0.samples[1..]);
        assert_eq!(w1.samples[79_999], 7_000);
    }

    #[test]
    fn first_window_waits_for_full_length() {
        let mut buf = buffer();
        let t0 = Instant::now();

        assert!(push_and_send(&mut buf, &tone(3.0, 0), t0).is_none());
        assert_eq!(buf.raw_len(), 48_000);

        let w = push_and_send(&mut buf, &tone(2.0, 48_000), t0).expect("window");
        assert_eq!(w.samples.len(), 80_000);
        assert_eq!(w.samples, tone(5.0, 0));
        assert_eq!(buf.raw_len(), 0);
    }

    #[test]
    fn overlap_is_tail_of_window_and_head_of_next() {
        let mut buf = buffer();
        let t0 = Instant::now();

        let w0 = push_and_send(&mut buf, &tone(5.0, 0), t0).expect("w0");
        assert_eq!(buf.overlap(), &w0.samples[48_000..]);

        let t1 = t0 + Duration::from_secs(3);
        let w1 = push_and_send(&mut buf, &tone(3.0, 80_000), t1).expect("w1");
        assert_eq!(w1.samples.len(), 80_000);
        assert_eq!(&w1.samples[..32_000], &w0.samples[48_000..]);
        // no audio duplicated or skipped: w1 is seconds 3..8 of the stream
        assert_eq!(w1.samples, tone(5.0, 48_000));
        assert_eq!(buf.overlap(), &w1.samples[48_000..]);
    }

    #[test]
    fn excess_raw_audio_is_kept_for_next_cycle() {
        let mut buf = buffer();
        let t0 = Instant::now();

        push_and_send(&mut buf, &tone(5.5, 0), t0).expect("w0");
        assert_eq!(buf.raw_len(), 8_000);

        let w1 = push_and_send(&mut buf, &tone(2.5, 88_000), t0 + Duration::from_secs(3))
            .expect("w1");
        assert_eq!(w1.samples, tone(5.0, 48_000));
        assert_eq!(buf.raw_len(), 0);
    }

    #[test]
    fn silent_window_is_suppressed_but_buffers_advance() {
        let mut buf = buffer();
        let t0 = Instant::now();

        assert!(push_and_send(&mut buf, &silence(5.0), t0).is_none());
        assert_eq!(buf.stats().silent, 1);
        assert_eq!(buf.stats().sent, 0);
        assert_eq!(buf.raw_len(), 0);
        assert_eq!(buf.overlap().len(), 32_000);
        assert!(!buf.is_assembling());

        // the silent tail is overlap context once, never a window of its own
        let w = push_and_send(&mut buf, &tone(3.0, 0), t0).expect("tone window");
        assert!(w.samples[..32_000].iter().all(|&s| s == 0));
        assert_eq!(&w.samples[32_000..], &tone(3.0, 0)[..]);
        assert_eq!(w.index, 1);
    }

    #[test]
    fn samples_just_below_threshold_count_as_silence() {
        let mut buf = buffer();
        // 0.008 × 32767 = 262.1
        let quiet: Vec<i16> = (0..80_000).map(|i| if i % 2 == 0 { 262 } else { -262 }).collect();
        assert!(buf.push(&quiet, Instant::now()).is_none());
        assert_eq!(buf.stats().silent, 1);

        let mut buf = buffer();
        let mut audible = quiet.clone();
        audible[40_000] = 263;
        assert!(buf.push(&audible, Instant::now()).is_some());
    }

    #[test]
    fn silence_then_tone_window_is_sent() {
        // 3 s silence + 2 s tone, repeated
        let mut buf = buffer();
        let t0 = Instant::now();
        let mut sent = Vec::new();

        for round in 0..4_u32 {
            let now = t0 + Duration::from_secs(5 * round as u64);
            for part in [silence(3.0), tone(2.0, 0)] {
                if let Some(w) = push_and_send(&mut buf, &part, now) {
                    sent.push(w);
                }
            }
        }

        assert!(!sent.is_empty());
        assert_eq!(buf.stats().silent, 0);
        for w in &sent {
            assert_eq!(w.samples.len(), 80_000);
            assert!(w.samples.iter().any(|&s| s != 0));
        }
    }

    #[test]
    fn sends_are_throttled_to_min_interval() {
        let mut buf = buffer();
        let t0 = Instant::now();

        push_and_send(&mut buf, &tone(5.0, 0), t0).expect("first");

        // trigger met again 100 ms later, must wait
        assert!(push_and_send(&mut buf, &tone(6.0, 80_000), t0 + Duration::from_millis(100)).is_none());
        assert!(push_and_send(&mut buf, &[], t0 + Duration::from_millis(499)).is_none());
        assert_eq!(buf.raw_len(), 96_000);

        let second = push_and_send(&mut buf, &[], t0 + Duration::from_millis(500)).expect("second");
        assert_eq!(second.samples.len(), 80_000);

        // still a backlog, but only one send per interval
        assert!(push_and_send(&mut buf, &[], t0 + Duration::from_millis(600)).is_none());
        assert!(push_and_send(&mut buf, &[], t0 + Duration::from_millis(1_000)).is_some());
        assert_eq!(buf.stats().sent, 3);
    }

    #[test]
    fn dropped_send_does_not_restart_interval() {
        let mut buf = buffer();
        let t0 = Instant::now();

        let p = buf.push(&tone(5.0, 0), t0).expect("window");
        p.finish(false, t0);
        assert_eq!(buf.stats().dropped, 1);

        // no successful send yet, so the next window is not throttled
        assert!(buf.push(&tone(3.0, 80_000), t0 + Duration::from_millis(1)).is_some());
    }

    #[test]
    fn abandoned_assembly_releases_the_guard() {
        let mut buf = buffer();
        {
            let pending = buf.push(&tone(5.0, 0), Instant::now()).expect("window");
            assert_eq!(pending.window().samples.len(), 80_000);
        }
        assert!(!buf.is_assembling());
        assert_eq!(buf.stats().dropped, 1);
        assert_eq!(buf.overlap().len(), 32_000);
    }

    #[test]
    fn hardware_sized_blocks_always_yield_full_windows() {
        let mut buf = buffer();
        let t0 = Instant::now();
        let block = 16_384;
        let mut windows = Vec::new();

        for n in 0..40_usize {
            let now = t0 + Duration::from_millis((n * block * 1_000 / RATE) as u64);
            if let Some(w) = push_and_send(&mut buf, &tone_n(block, n * block), now) {
                windows.push(w);
            }
            assert!(buf.overlap().len() <= 32_000);
            assert!(buf.raw_len() < 80_000 + block);
        }

        assert!(windows.len() >= 10, "only {} windows", windows.len());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].samples.len(), 80_000);
            assert_eq!(&pair[1].samples[..32_000], &pair[0].samples[48_000..]);
        }
    }
}
