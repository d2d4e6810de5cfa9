//! Boundary to the GPU texture uploader.

use crate::dsp::spectrum::PackedSpectrum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFormat {
    /// One 32-bit float per texel.
    #[default]
    R32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::R32Float => std::mem::size_of::<f32>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureDesc {
    pub width: usize,
    pub height: usize,
    pub format: TextureFormat,
}

impl TextureDesc {
    /// Texture shape for a packed spectrum: one row per channel.
    pub fn for_spectrum(spectrum: &PackedSpectrum) -> Self {
        Self {
            width: spectrum.columns(),
            height: spectrum.channels(),
            format: TextureFormat::R32Float,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Receives one full texture image per call. `texels` is row-major and
/// exactly `desc.texel_count()` long.
pub trait TextureUpload {
    fn upload(&mut self, desc: TextureDesc, texels: &[f32]);
}

/// Keeps the last uploaded image in memory.
#[derive(Debug, Clone, Default)]
pub struct CpuTexture {
    desc: TextureDesc,
    texels: Vec<f32>,
    uploads: u64,
}

impl CpuTexture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn texels(&self) -> &[f32] {
        &self.texels
    }

    /// Raw texel bytes as they would be copied into a GPU staging buffer.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.texels())
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads
    }
}

#[cfg(test)]
impl CpuTexture {
    pub fn row(&self, y: usize) -> &[f32] {
        let start = (y * self.desc.width).min(self.texels.len());
        let end = (start + self.desc.width).min(self.texels.len());
        &self.texels[start..end]
    }
}

impl TextureUpload for CpuTexture {
    fn upload(&mut self, desc: TextureDesc, texels: &[f32]) {
        debug_assert_eq!(texels.len(), desc.texel_count());
        self.desc = desc;
        self.texels.clear();
        self.texels.extend_from_slice(texels);
        self.uploads += 1;
        debug_assert_eq!(
            self.bytes().len(),
            desc.texel_count() * desc.format.bytes_per_texel()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_latest_upload() {
        let mut texture = CpuTexture::new();
        let desc = TextureDesc {
            width: 2,
            height: 2,
            format: TextureFormat::R32Float,
        };
        texture.upload(desc, &[1.0, 2.0, 3.0, 4.0]);
        texture.upload(desc, &[5.0, 6.0, 7.0, 8.0]);

        assert_eq!(texture.upload_count(), 2);
        assert_eq!(texture.row(1), &[7.0, 8.0]);
        assert_eq!(texture.desc(), desc);
    }

    #[test]
    fn exposes_native_texel_bytes() {
        let mut texture = CpuTexture::new();
        let desc = TextureDesc {
            width: 1,
            height: 1,
            format: TextureFormat::R32Float,
        };
        texture.upload(desc, &[1.0]);

        assert_eq!(texture.bytes().len(), desc.format.bytes_per_texel());
        assert_eq!(texture.bytes(), 1.0f32.to_ne_bytes().as_slice());
    }

    #[test]
    fn out_of_range_rows_are_empty() {
        let texture = CpuTexture::new();
        assert!(texture.row(3).is_empty());
    }
}
