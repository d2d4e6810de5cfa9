//! PipeWire capture streams feeding registered audio sources.

use super::MAX_AUDIO_CHANNELS;
use super::source::{AudioSource, SourceRegistry};
use super::AudioBlock;
use crate::util::audio::{DEFAULT_SAMPLE_RATE, deinterleave_f32le};
use anyhow::{Context, Result, ensure};
use pipewire as pw;
use pw::{properties::properties, spa};
use spa::param::audio::{AudioFormat, AudioInfoRaw};
use spa::pod::Pod;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

const CAPTURE_THREAD_NAME: &str = "shadermeter-pw-capture";
const CAPTURE_CHANNELS: u32 = 2;

/// Start one capture stream per name on a dedicated PipeWire thread. Each
/// name is registered with `registry` (existing entries are reused).
pub fn spawn(registry: &SourceRegistry, names: &[String]) -> Result<thread::JoinHandle<()>> {
    let sources: Vec<Arc<AudioSource>> = names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| registry.register(name, CAPTURE_CHANNELS as usize))
        .collect();
    ensure!(!sources.is_empty(), "no capture sources configured");

    thread::Builder::new()
        .name(CAPTURE_THREAD_NAME.into())
        .spawn(move || {
            if let Err(err) = run_capture(sources) {
                error!("[pw-capture] stopped: {err:?}");
            }
        })
        .context("failed to spawn PipeWire capture thread")
}

/// Per-stream format and scratch planes.
struct CaptureState {
    source: Arc<AudioSource>,
    channels: usize,
    sample_rate: u32,
    format: AudioFormat,
    planes: Vec<Vec<f32>>,
}

impl CaptureState {
    fn new(source: Arc<AudioSource>, channels: u32, sample_rate: u32) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            source,
            channels,
            sample_rate,
            format: AudioFormat::F32LE,
            planes: vec![Vec::new(); channels],
        }
    }

    fn update_from_info(&mut self, info: &AudioInfoRaw) {
        self.channels = info.channels().max(1) as usize;
        self.sample_rate = info.rate();
        self.format = info.format();
        self.planes.resize_with(self.channels, Vec::new);
        self.source.set_format(self.channels, self.sample_rate);

        if self.format != AudioFormat::F32LE {
            warn!(
                "[pw-capture] '{}' negotiated {:?}; only F32LE is captured",
                self.source.name(),
                self.format
            );
        }
        info!(
            "[pw-capture] '{}' negotiated format: {:?}, rate {} Hz, channels {}",
            self.source.name(),
            self.format,
            self.sample_rate,
            self.channels
        );
    }

    /// Split one interleaved buffer into planes and hand it to the source.
    fn deliver(&mut self, bytes: &[u8]) {
        if self.format != AudioFormat::F32LE {
            return;
        }

        let frames = deinterleave_f32le(bytes, &mut self.planes);
        if frames == 0 {
            return;
        }

        let mut planes: [&[f32]; MAX_AUDIO_CHANNELS] = [&[]; MAX_AUDIO_CHANNELS];
        let count = self.planes.len().min(MAX_AUDIO_CHANNELS);
        for (slot, plane) in planes.iter_mut().zip(&self.planes) {
            *slot = plane.as_slice();
        }
        self.source
            .deliver(&AudioBlock::new(&planes[..count], frames, false));
    }
}

fn run_capture(sources: Vec<Arc<AudioSource>>) -> Result<()> {
    pw::init();

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).context("failed to create PipeWire main loop")?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .context("failed to create PipeWire context")?;
    let core = context
        .connect_rc(None)
        .context("failed to connect to PipeWire core")?;

    let format_bytes = build_format_pod(CAPTURE_CHANNELS, DEFAULT_SAMPLE_RATE as u32)?;
    let mut streams = Vec::with_capacity(sources.len());

    for source in sources {
        let name = source.name().to_string();
        let node_name = capture_node_name(&name);
        let stream = pw::stream::StreamBox::new(
            &core,
            &format!("shadermeter capture ({name})"),
            properties! {
                *pw::keys::MEDIA_TYPE => "Audio",
                *pw::keys::MEDIA_CATEGORY => "Capture",
                *pw::keys::MEDIA_ROLE => "Music",
                *pw::keys::APP_NAME => "shadermeter",
                *pw::keys::NODE_NAME => node_name.as_str(),
                "target.object" => name.as_str(),
                "stream.capture.sink" => "true",
            },
        )
        .with_context(|| format!("failed to create capture stream for '{name}'"))?;

        let state = CaptureState::new(source, CAPTURE_CHANNELS, DEFAULT_SAMPLE_RATE as u32);
        let label = name.clone();
        let listener = stream
            .add_local_listener_with_user_data(state)
            .state_changed(move |_, _, previous, current| {
                debug!("[pw-capture] '{label}' state {previous:?} -> {current:?}");
            })
            .param_changed(|_, state, id, param| {
                if id != spa::param::ParamType::Format.as_raw() {
                    return;
                }

                if let Some(pod) = param {
                    let mut info = AudioInfoRaw::new();
                    if info.parse(pod).is_ok() {
                        state.update_from_info(&info);
                    }
                }
            })
            .process(|stream, state| {
                let Some(mut buffer) = stream.dequeue_buffer() else {
                    return;
                };

                let Some(data) = buffer.datas_mut().first_mut() else {
                    return;
                };
                let (offset, size) = {
                    let chunk = data.chunk();
                    (chunk.offset() as usize, chunk.size() as usize)
                };
                if size == 0 {
                    return;
                }

                if let Some(slice) = data.data() {
                    let start = offset.min(slice.len());
                    let end = start.saturating_add(size).min(slice.len());
                    state.deliver(&slice[start..end]);
                }
            })
            .register()
            .with_context(|| format!("failed to register listener for '{name}'"))?;

        let mut params =
            [Pod::from_bytes(&format_bytes).context("invalid capture format pod")?];
        stream
            .connect(
                spa::utils::Direction::Input,
                None,
                pw::stream::StreamFlags::AUTOCONNECT
                    | pw::stream::StreamFlags::MAP_BUFFERS
                    | pw::stream::StreamFlags::RT_PROCESS,
                &mut params,
            )
            .with_context(|| format!("failed to connect capture stream for '{name}'"))?;

        info!("[pw-capture] capturing '{name}'");
        streams.push((stream, listener));
    }

    mainloop.run();
    info!("[pw-capture] main loop exited");

    drop(streams);
    Ok(())
}

/// Node name advertised for the stream capturing `source`.
fn capture_node_name(source: &str) -> String {
    format!("shadermeter.capture.{source}")
}

/// Describe the requested raw capture format as a SPA pod.
fn build_format_pod(channels: u32, rate: u32) -> Result<Vec<u8>> {
    let mut info = AudioInfoRaw::new();
    info.set_format(AudioFormat::F32LE);
    info.set_rate(rate);
    info.set_channels(channels);

    let (cursor, _) = spa::pod::serialize::PodSerializer::serialize(
        Cursor::new(Vec::new()),
        &spa::pod::Value::Object(spa::pod::Object {
            type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
            id: spa::param::ParamType::EnumFormat.as_raw(),
            properties: info.into(),
        }),
    )
    .context("failed to serialize capture format")?;

    Ok(cursor.into_inner())
}
