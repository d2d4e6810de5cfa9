//! Turns per-channel analysis snapshots into the packed float matrix that
//! backs an audio texture.

use super::Reconfigurable;
use super::transform::{RealFftTransform, SpectralTransform, padded_len};
use super::window::WindowKind;
use crate::util::audio::{DB_FLOOR, apply_window, power_to_db};

pub const MIN_WINDOW_LENGTH: usize = 64;
pub const MAX_WINDOW_LENGTH: usize = 1024;
pub const DEFAULT_WINDOW_LENGTH: usize = 1024;
pub const DEFAULT_BIN_COUNT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumConfig {
    /// Samples per channel taken from the ring buffer every tick.
    pub window_length: usize,
    /// Requested output bins; 0 or anything >= half the window keeps every bin.
    pub bins: usize,
    pub window: WindowKind,
    /// Convert retained magnitudes to log power.
    pub psd: bool,
    /// When false the raw snapshot is uploaded without any analysis.
    pub fft: bool,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            window_length: DEFAULT_WINDOW_LENGTH,
            bins: DEFAULT_BIN_COUNT,
            window: WindowKind::None,
            psd: false,
            fft: true,
        }
    }
}

impl SpectrumConfig {
    pub fn normalized(mut self) -> Self {
        self.window_length = self
            .window_length
            .clamp(MIN_WINDOW_LENGTH, MAX_WINDOW_LENGTH);
        self
    }

    /// Usable spectrum points per channel.
    pub fn half_window(&self) -> usize {
        self.window_length / 2
    }

    /// Columns of the packed output.
    pub fn output_columns(&self) -> usize {
        if !self.fft {
            return self.window_length;
        }
        let half = self.half_window();
        if self.bins == 0 || self.bins >= half {
            half
        } else {
            self.bins
        }
    }

    /// Transform points averaged into each output bin.
    pub fn bin_width(&self) -> usize {
        let columns = self.output_columns();
        if !self.fft || columns == 0 {
            return 1;
        }
        (self.half_window() / columns).max(1)
    }
}

/// Row-major `channels x columns` float matrix handed to texture upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedSpectrum {
    channels: usize,
    columns: usize,
    data: Vec<f32>,
}

impl PackedSpectrum {
    fn reshape(&mut self, channels: usize, columns: usize) {
        self.channels = channels;
        self.columns = columns;
        self.data.resize(channels * columns, 0.0);
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, channel: usize) -> &[f32] {
        let start = channel * self.columns;
        &self.data[start..start + self.columns]
    }

    /// Index and value of the largest column in `channel`.
    pub fn peak(&self, channel: usize) -> Option<(usize, f32)> {
        if channel >= self.channels {
            return None;
        }
        self.row(channel)
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Log power of a transform magnitude: `10 * log10(x^2 / (2 pi L))`.
#[inline]
pub fn psd_db(magnitude: f32, window_length: usize) -> f32 {
    let norm = 1.0 / (core::f32::consts::TAU * window_length.max(1) as f32);
    power_to_db(magnitude * magnitude * norm, DB_FLOOR)
}

/// Average equal-width groups of `src` into `dst`. A remainder that does not
/// fill a whole group is dropped from the tail.
pub fn average_bins(src: &[f32], dst: &mut [f32]) {
    if dst.is_empty() {
        return;
    }
    if dst.len() >= src.len() {
        dst[..src.len()].copy_from_slice(src);
        dst[src.len()..].fill(0.0);
        return;
    }

    let width = src.len() / dst.len();
    let inv = 1.0 / width as f32;
    for (out, group) in dst.iter_mut().zip(src.chunks_exact(width)) {
        *out = group.iter().sum::<f32>() * inv;
    }
}

/// Centre frequency (Hz) of an output column.
pub fn bin_frequency(config: &SpectrumConfig, column: usize, sample_rate: f32) -> f32 {
    let width = config.bin_width();
    let centre = (column * width) as f32 + (width as f32 - 1.0) * 0.5;
    centre * sample_rate / padded_len(config.window_length) as f32
}

pub struct SpectrumAssembler {
    config: SpectrumConfig,
    channels: usize,
    window: Vec<f32>,
    transform: Box<dyn SpectralTransform>,
    snapshot: Vec<f32>,
    output: PackedSpectrum,
}

impl std::fmt::Debug for SpectrumAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAssembler")
            .field("config", &self.config)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl SpectrumAssembler {
    pub fn new(config: SpectrumConfig, channels: usize) -> Self {
        Self::with_transform(config, channels, Box::new(RealFftTransform::new()))
    }

    pub fn with_transform(
        config: SpectrumConfig,
        channels: usize,
        transform: Box<dyn SpectralTransform>,
    ) -> Self {
        let mut assembler = Self {
            config,
            channels,
            window: Vec::new(),
            transform,
            snapshot: Vec::new(),
            output: PackedSpectrum::default(),
        };
        assembler.rebuild();
        assembler
    }

    pub fn config(&self) -> SpectrumConfig {
        self.config
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Snapshot storage, `channels` rows of `window_length` samples.
    pub fn snapshot_mut(&mut self) -> &mut [f32] {
        &mut self.snapshot
    }

    pub fn output(&self) -> &PackedSpectrum {
        &self.output
    }

    fn rebuild(&mut self) {
        let len = self.config.window_length;
        self.window = self.config.window.coefficients(len);
        self.snapshot.clear();
        self.snapshot.resize(self.channels * len, 0.0);
        self.output
            .reshape(self.channels, self.config.output_columns());
    }

    /// Run one pass over the current snapshot and return the packed result.
    pub fn assemble(&mut self) -> &PackedSpectrum {
        let len = self.config.window_length;
        let columns = self.config.output_columns();
        self.output.reshape(self.channels, columns);
        if len == 0 || self.channels == 0 {
            return &self.output;
        }

        if !self.config.fft {
            self.output.data.copy_from_slice(&self.snapshot);
            return &self.output;
        }

        // windows shorter than two samples have no usable spectrum
        let half = self.config.half_window();
        if half == 0 || columns == 0 {
            self.output.data.fill(0.0);
            return &self.output;
        }

        for row in self.snapshot.chunks_exact_mut(len) {
            apply_window(row, &self.window);
            self.transform.transform(row);
        }

        if self.config.psd {
            for row in self.snapshot.chunks_exact_mut(len) {
                for value in &mut row[..half] {
                    *value = psd_db(*value, len);
                }
            }
        }

        for (row, out) in self
            .snapshot
            .chunks_exact(len)
            .zip(self.output.data.chunks_exact_mut(columns))
        {
            average_bins(&row[..half], out);
        }

        &self.output
    }
}

impl Reconfigurable<SpectrumConfig> for SpectrumAssembler {
    fn update_config(&mut self, config: SpectrumConfig) {
        self.config = config;
        self.rebuild();
    }
}
