//! Audio-bound shader parameters.
//!
//! A parameter owns one sidechain binding and one spectrum assembler. Every
//! render tick it re-assembles its texture if new audio arrived since the
//! last upload.

use crate::audio::MAX_AUDIO_CHANNELS;
use crate::audio::sidechain::SidechainBinding;
use crate::audio::source::SourceResolver;
use crate::dsp::Reconfigurable;
use crate::dsp::spectrum::{
    DEFAULT_BIN_COUNT, DEFAULT_WINDOW_LENGTH, MAX_WINDOW_LENGTH, MIN_WINDOW_LENGTH,
    PackedSpectrum, SpectrumAssembler, SpectrumConfig,
};
use crate::dsp::window::WindowKind;
use crate::texture::{TextureDesc, TextureUpload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Annotations read from the shader's parameter metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioAnnotations {
    pub is_fft: bool,
    pub fft_samples: i64,
    pub fft_bins: i64,
    pub is_psd: bool,
    pub window: Option<String>,
    /// Channels captured for this parameter; 0 uses the configured default.
    pub channels: i64,
}

impl Default for AudioAnnotations {
    fn default() -> Self {
        Self {
            is_fft: false,
            fft_samples: DEFAULT_WINDOW_LENGTH as i64,
            fft_bins: DEFAULT_BIN_COUNT as i64,
            is_psd: false,
            window: None,
            channels: 0,
        }
    }
}

impl AudioAnnotations {
    /// Channel count for this parameter, clamped to what a binding tracks.
    pub fn channel_count(&self, default: usize) -> usize {
        let requested = usize::try_from(self.channels).unwrap_or(0);
        let channels = if requested == 0 { default } else { requested };
        channels.clamp(1, MAX_AUDIO_CHANNELS)
    }

    pub fn to_spectrum_config(&self) -> SpectrumConfig {
        let window_length = self
            .fft_samples
            .clamp(MIN_WINDOW_LENGTH as i64, MAX_WINDOW_LENGTH as i64)
            as usize;
        SpectrumConfig {
            window_length,
            bins: usize::try_from(self.fft_bins).unwrap_or(0),
            window: WindowKind::resolve(self.window.as_deref()),
            psd: self.is_psd,
            fft: self.is_fft,
        }
        .normalized()
    }
}

pub struct AudioParam {
    name: String,
    default_channels: usize,
    annotations: AudioAnnotations,
    resolver: Arc<dyn SourceResolver>,
    binding: SidechainBinding,
    assembler: SpectrumAssembler,
    last_generation: Option<u64>,
}

impl std::fmt::Debug for AudioParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioParam")
            .field("name", &self.name)
            .field("annotations", &self.annotations)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl AudioParam {
    pub fn new(
        name: impl Into<String>,
        annotations: AudioAnnotations,
        default_channels: usize,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        let channels = annotations.channel_count(default_channels);
        let binding = SidechainBinding::new(channels, Arc::clone(&resolver));
        let assembler = SpectrumAssembler::new(annotations.to_spectrum_config(), channels);
        Self {
            name: name.into(),
            default_channels,
            annotations,
            resolver,
            binding,
            assembler,
            last_generation: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn annotations(&self) -> &AudioAnnotations {
        &self.annotations
    }

    pub fn config(&self) -> SpectrumConfig {
        self.assembler.config()
    }

    pub fn binding(&self) -> &SidechainBinding {
        &self.binding
    }

    /// Last assembled texture contents.
    pub fn spectrum(&self) -> &PackedSpectrum {
        self.assembler.output()
    }

    /// Select the source feeding this parameter by name.
    pub fn set_source(&mut self, source: &str) -> bool {
        self.binding.rebind(source)
    }

    /// Assemble and upload if audio changed since the previous upload, or if
    /// nothing has been uploaded yet. Returns whether an upload happened.
    pub fn tick(&mut self, uploader: &mut dyn TextureUpload) -> bool {
        if self.last_generation == Some(self.binding.generation()) {
            return false;
        }

        let window_length = self.assembler.config().window_length;
        let generation = self
            .binding
            .snapshot(window_length, self.assembler.snapshot_mut());
        let spectrum = self.assembler.assemble();
        uploader.upload(TextureDesc::for_spectrum(spectrum), spectrum.as_slice());
        self.last_generation = Some(generation);
        true
    }

    /// Apply new annotations. The binding is torn down and rebuilt against the
    /// same source name so no samples from the old configuration survive.
    pub fn reload(&mut self, annotations: AudioAnnotations) {
        let source = self.binding.source_name();
        let channels = annotations.channel_count(self.default_channels);
        self.binding = SidechainBinding::new(channels, Arc::clone(&self.resolver));
        if let Some(source) = source {
            self.binding.rebind(&source);
        }

        let config = annotations.to_spectrum_config();
        if channels == self.assembler.channels() {
            self.assembler.update_config(config);
        } else {
            self.assembler = SpectrumAssembler::new(config, channels);
        }
        self.annotations = annotations;
        self.last_generation = None;
        debug!(
            "[param] '{}' reloaded: {:?}",
            self.name,
            self.assembler.config()
        );
    }
}
