//! Channel downmix and sample-rate conversion.
//!
//! Devices that refuse a 16 kHz mono stream are opened with their default
//! configuration instead; the capture callback then runs each buffer through
//! [`downmix_to_mono`] and a [`LinearResampler`] before blocking.  WAV replay
//! converts the whole file at once with [`resample_linear`].

/// Average interleaved multi-channel audio down to one channel.
///
/// The output length is `samples.len() / channels`; a trailing partial frame
/// is discarded.  `channels == 0` yields an empty vector.
///
/// ```rust
/// use scamwatch::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample mono `samples` from `source_rate` to `target_rate` Hz using
/// linear interpolation.
///
/// Equal rates return a copy.  A zero rate on either side yields an empty
/// vector.  The output length is `ceil(len * target_rate / source_rate)`.
///
/// ```rust
/// use scamwatch::audio::resample_linear;
///
/// let hi = vec![0.5_f32; 480];
/// let lo = resample_linear(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let step = source_rate as f64 / target_rate as f64;
    let output_len = (samples.len() as f64 * target_rate as f64 / source_rate as f64).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[idx + 1] - samples[idx]) * frac
        })
        .collect()
}

/// Streaming linear-interpolation resampler.
///
/// Carries the fractional read position and the last input sample from one
/// buffer to the next, so a signal split into arbitrary pieces converts to
/// the same output as the whole signal, at exactly `target / source` samples
/// per input sample over time.
///
/// ```rust
/// use scamwatch::audio::LinearResampler;
///
/// let mut r = LinearResampler::new(48_000, 16_000);
/// let mut total = 0;
/// for _ in 0..100 {
///     total += r.process(&[0.1_f32; 441]).len();
/// }
/// assert!(total.abs_diff(14_700) <= 1);
/// ```
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples advanced per output sample.
    step: f64,
    /// Next output position; index 0 is `prev` when it is set.
    pos: f64,
    prev: Option<f32>,
    passthrough: bool,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let passthrough = source_rate == target_rate || source_rate == 0 || target_rate == 0;
        Self {
            step: if passthrough {
                1.0
            } else {
                source_rate as f64 / target_rate as f64
            },
            pos: 0.0,
            prev: None,
            passthrough,
        }
    }

    /// Convert the next piece of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.passthrough {
            return input.to_vec();
        }
        let Some(&last) = input.last() else {
            return Vec::new();
        };

        let prev = self.prev;
        let offset = usize::from(prev.is_some());
        let len = offset + input.len();
        let at = |i: usize| match prev {
            Some(p) if i == 0 => p,
            _ => input[i - offset],
        };

        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        while self.pos + 1.0 < len as f64 {
            let idx = self.pos as usize;
            let frac = (self.pos - idx as f64) as f32;
            let a = at(idx);
            out.push(a + (at(idx + 1) - a) * frac);
            self.pos += self.step;
        }

        // the last sample of this piece becomes index 0 of the next one
        self.pos -= (len - 1) as f64;
        self.prev = Some(last);
        out
    }
}
