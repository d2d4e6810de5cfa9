mod audio;
mod dsp;
mod logging;
mod param;
mod settings;
mod texture;
mod util;

use anyhow::Result;
use audio::pw_capture;
use audio::source::SourceRegistry;
use dsp::spectrum::bin_frequency;
use param::AudioParam;
use settings::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use texture::CpuTexture;
use tracing::{error, info, warn};
use util::audio::{hz_to_mel, mel_to_hz};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(5);
// Width of the mel bands used to label peaks in summaries.
const MEL_BAND: f32 = 100.0;

fn main() -> Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(settings::default_path);
    let settings = settings::load_or_default(&path);
    logging::init(&settings.log_level)?;

    if let Err(err) = settings::persist_if_missing(&path, &settings) {
        warn!("[settings] {err:?}");
    }

    let registry = Arc::new(SourceRegistry::new());
    let names = settings.source_names();
    for name in &names {
        registry.register(name, settings.channels);
    }

    let _capture = match pw_capture::spawn(&registry, &names) {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!("[pw-capture] failed to start: {err:?}");
            None
        }
    };
    info!("[main] audio sources: [{}]", registry.names().join(", "));

    let mut params: Vec<(AudioParam, CpuTexture)> = settings
        .params
        .iter()
        .map(|entry| {
            let mut param = AudioParam::new(
                &entry.name,
                entry.annotations.clone(),
                settings.channels,
                registry.clone(),
            );
            param.set_source(&entry.source);
            info!(
                "[main] parameter '{}' <- '{}': {:?}",
                param.name(),
                entry.source,
                param.annotations()
            );
            (param, CpuTexture::new())
        })
        .collect();

    run(&mut params, &settings, &path);
    Ok(())
}

fn run(params: &mut [(AudioParam, CpuTexture)], settings: &Settings, path: &Path) {
    let period = Duration::from_secs_f32(1.0 / settings.tick_rate_hz);
    let deadline = run_deadline(Instant::now(), settings.run_seconds);
    let mut next_summary = Instant::now() + SUMMARY_INTERVAL;
    let mut ticks: u64 = 0;
    let mut settings_modified = modified_time(path);

    info!(
        "[main] ticking {} parameter(s) at {} Hz",
        params.len(),
        settings.tick_rate_hz
    );

    loop {
        let started = Instant::now();
        if deadline.is_some_and(|deadline| started >= deadline) {
            break;
        }

        for (param, texture) in params.iter_mut() {
            param.tick(texture);
        }
        ticks += 1;

        if started >= next_summary {
            for (param, texture) in params.iter() {
                log_summary(param, texture);
            }
            next_summary = started + SUMMARY_INTERVAL;

            let modified = modified_time(path);
            if modified != settings_modified {
                settings_modified = modified;
                info!("[settings] {path:?} changed; applying parameter settings");
                apply_param_settings(params, &settings::load_or_default(path));
            }
        }

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    info!("[main] stopped after {ticks} ticks");
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Push edited annotations and source names onto the running parameters,
/// matched by name. Parameters added or removed in the file are ignored.
fn apply_param_settings(params: &mut [(AudioParam, CpuTexture)], settings: &Settings) {
    for (param, _) in params.iter_mut() {
        let Some(entry) = settings.params.iter().find(|entry| entry.name == param.name()) else {
            continue;
        };
        if entry.annotations != *param.annotations() {
            param.reload(entry.annotations.clone());
        }
        param.set_source(&entry.source);
    }
}

/// Instant at which the tick loop stops; `None` runs forever, including
/// durations too large to represent.
fn run_deadline(start: Instant, run_seconds: Option<f32>) -> Option<Instant> {
    let secs = run_seconds?;
    let duration = Duration::try_from_secs_f32(secs).ok()?;
    start.checked_add(duration)
}

/// Edges (Hz) of the mel band containing `hz`.
fn mel_band(hz: f32) -> (f32, f32) {
    let low = (hz_to_mel(hz) / MEL_BAND).floor() * MEL_BAND;
    (mel_to_hz(low), mel_to_hz(low + MEL_BAND))
}

fn log_summary(param: &AudioParam, texture: &CpuTexture) {
    let binding = param.binding();
    let source = binding.source_name().unwrap_or_default();
    if binding.is_failed() {
        warn!(
            "[main] '{}' <- '{source}': capture disabled after an allocation failure",
            param.name()
        );
        return;
    }
    if !binding.is_bound() {
        info!(
            "[main] '{}' <- '{source}': no live source, uploading silence",
            param.name()
        );
        return;
    }

    let desc = texture.desc();
    let Some((column, value)) = param.spectrum().peak(0) else {
        return;
    };

    let config = param.config();
    if config.fft {
        let hz = bin_frequency(&config, column, binding.sample_rate());
        let (low, high) = mel_band(hz);
        info!(
            "[main] '{}' <- '{source}': peak bin {column} ({hz:.0} Hz, {:.0} mel, band {low:.0}-{high:.0} Hz) = {value:.2}; {}x{} texture, {} bytes, {} uploads",
            param.name(),
            hz_to_mel(hz),
            desc.width,
            desc.height,
            texture.bytes().len(),
            texture.upload_count()
        );
    } else {
        info!(
            "[main] '{}' <- '{source}': peak sample {value:.3}; {}x{} texture, {} bytes, {} uploads",
            param.name(),
            desc.width,
            desc.height,
            texture.bytes().len(),
            texture.upload_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_run_lengths_run_forever() {
        let start = Instant::now();
        assert_eq!(run_deadline(start, None), None);
        assert_eq!(run_deadline(start, Some(1.0e30)), None);
        assert_eq!(
            run_deadline(start, Some(2.0)),
            Some(start + Duration::from_secs(2))
        );
    }

    #[test]
    fn edited_settings_reach_running_parameters() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register("music", 2);
        registry.register("voice", 2);

        let mut settings = Settings::default();
        settings.params[0].source = "music".into();
        let entry = &settings.params[0];
        let param = AudioParam::new(&entry.name, entry.annotations.clone(), 2, registry.clone());
        let mut params = vec![(param, CpuTexture::new())];
        apply_param_settings(&mut params, &settings);
        assert_eq!(params[0].0.binding().source_name().as_deref(), Some("music"));

        settings.params[0].source = "voice".into();
        settings.params[0].annotations.fft_bins = 16;
        apply_param_settings(&mut params, &settings);

        let (param, texture) = &mut params[0];
        assert_eq!(param.binding().source_name().as_deref(), Some("voice"));
        assert!(param.binding().is_bound());
        assert_eq!(param.config().output_columns(), 16);
        assert!(param.tick(texture));
        assert_eq!(texture.desc().width, 16);
    }

    #[test]
    fn mel_band_brackets_the_frequency() {
        for hz in [60.0f32, 440.0, 3_750.0, 12_000.0] {
            let (low, high) = mel_band(hz);
            assert!(low <= hz * 1.0001 && hz <= high * 1.0001, "{hz}: {low}-{high}");
        }
    }
}
