//! WebM muxer state machine
//!
//! Drives the whole pipeline: extracts VP8 keyframes from host-supplied WebP
//! bytes, groups them into clusters by duration, accumulates cue points, and
//! back-patches the SeekHead, Duration, and Segment size once the stream is
//! complete.

use crate::ebml::{self, write_children, write_element, Element, SizeHint};
use crate::encoder::{alpha_plane, WebpEncoder};
use crate::sink::{Blob, BlobSink, WriteSeek};
use crate::stream::{measure_unsigned_int, ByteStream};
use crate::webp;
use crate::{Error, Result};
use image::RgbaImage;
use log::debug;

/// Clusters are rotated once their accumulated duration reaches this bound
const MAX_CLUSTER_DURATION_MS: f64 = 5000.0;

/// The single video track
const DEFAULT_TRACK_NUMBER: u64 = 1;

/// Upper clamp for encoder quality
const MAX_QUALITY: f32 = 0.99999;

/// Nanoseconds per timecode tick; 1_000_000 makes every timecode milliseconds
const TIMECODE_SCALE_NS: u64 = 1_000_000;

/// Application name stamped into SegmentInfo
const APP_NAME: &str = "webm-writer-js";

/// Per-block overhead estimate when pre-sizing the cluster scratch buffer
const BLOCK_HEADER_ESTIMATE: usize = 64;

/// SimpleBlock flags byte with the keyframe bit set
const SIMPLE_BLOCK_KEYFRAME_FLAGS: u8 = 0x80;

// Indices of the three Seek entries inside the SeekHead, in emission order
const SEEK_INDEX_CUES: usize = 0;
const SEEK_INDEX_INFO: usize = 1;
const SEEK_INDEX_TRACKS: usize = 2;

/// Muxer configuration
///
/// Exactly one of `frame_duration_ms` or `frame_rate` must be set;
/// `frame_duration_ms` wins when both are.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Encoder quality for color frames, clamped to `[0, 0.99999]`
    pub quality: f32,
    /// Encoder quality for alpha frames; defaults to `quality`
    pub alpha_quality: Option<f32>,
    /// Emit `AlphaMode=1` and carry a second VP8 bitstream per frame
    pub transparent: bool,
    /// Default milliseconds per frame
    pub frame_duration_ms: Option<f64>,
    /// Alternative timing: frames per second
    pub frame_rate: Option<f64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            quality: 0.95,
            alpha_quality: None,
            transparent: false,
            frame_duration_ms: None,
            frame_rate: None,
        }
    }
}

impl WriterOptions {
    /// Resolve the default frame duration in milliseconds
    pub fn frame_duration(&self) -> Result<f64> {
        let duration = match (self.frame_duration_ms, self.frame_rate) {
            (Some(duration), _) => duration,
            (None, Some(rate)) => 1000.0 / rate,
            (None, None) => return Err(Error::MissingFrameTiming),
        };
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::BadFrameDuration(duration));
        }
        Ok(duration)
    }

    fn clamped_quality(&self) -> f32 {
        self.quality.clamp(0.0, MAX_QUALITY)
    }

    fn clamped_alpha_quality(&self) -> f32 {
        self.alpha_quality.unwrap_or(self.quality).clamp(0.0, MAX_QUALITY)
    }
}

/// One frame buffered for the current cluster
struct PendingFrame {
    frame: Vec<u8>,
    alpha: Option<Vec<u8>>,
    /// Cluster-relative timecode
    timecode_ms: i16,
}

/// Index entry recorded per flushed cluster
struct CuePoint {
    time_ms: u64,
    /// Cluster offset relative to the segment payload
    cluster_position: u64,
}

/// Offsets and retained elements needed for completion-time patching
struct SegmentHandles {
    /// Absolute offset of the Segment id byte
    segment_offset: u64,
    /// Absolute offset of the Segment payload
    segment_data_offset: u64,
    /// Retained SeekHead; its placeholder children are rewritten in place
    seek_head: Element,
    /// Absolute offset of the Duration float payload
    duration_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Writing,
    Completed,
}

/// Incremental WebM muxer for VP8 keyframe video
///
/// Frames are appended one at a time and flushed to the sink in clusters;
/// `complete` finalizes the container. All methods reject further use after
/// completion.
pub struct WebmWriter {
    options: WriterOptions,
    frame_duration_ms: f64,
    track_number: u64,
    sink: BlobSink,
    state: State,
    handles: Option<SegmentHandles>,
    dimensions: Option<(u32, u32)>,
    cluster_frames: Vec<PendingFrame>,
    cluster_duration_ms: f64,
    cluster_start_ms: f64,
    cues: Vec<CuePoint>,
    alpha_scratch: Option<RgbaImage>,
}

impl WebmWriter {
    /// Muxer that buffers output in memory until [`WebmWriter::complete`]
    pub fn new(options: WriterOptions) -> Result<Self> {
        Self::with_sink(BlobSink::new_memory(), options)
    }

    /// Muxer that streams output to a seekable target (typically a file)
    pub fn with_target(target: Box<dyn WriteSeek>, options: WriterOptions) -> Result<Self> {
        Self::with_sink(BlobSink::new_target(target), options)
    }

    fn with_sink(sink: BlobSink, options: WriterOptions) -> Result<Self> {
        let frame_duration_ms = options.frame_duration()?;
        Ok(Self {
            options,
            frame_duration_ms,
            track_number: DEFAULT_TRACK_NUMBER,
            sink,
            state: State::Initial,
            handles: None,
            dimensions: None,
            cluster_frames: Vec::new(),
            cluster_duration_ms: 0.0,
            cluster_start_ms: 0.0,
            cues: Vec::new(),
            alpha_scratch: None,
        })
    }

    /// Total bytes ever addressed in the output
    pub fn written_size(&self) -> u64 {
        self.sink.length()
    }

    /// Append one pre-encoded WebP frame
    ///
    /// `alpha_webp` supplies the alpha plane as a second WebP byte string; it
    /// is only consumed when the muxer was configured `transparent`.
    /// `duration_override` replaces the configured per-frame duration for
    /// this frame only.
    pub fn add_webp_frame(
        &mut self,
        webp: &[u8],
        alpha_webp: Option<&[u8]>,
        duration_override: Option<f64>,
    ) -> Result<()> {
        if self.state == State::Completed {
            return Err(Error::Completed);
        }

        let duration = duration_override.unwrap_or(self.frame_duration_ms);
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::BadFrameDuration(duration));
        }

        let keyframe = webp::extract_keyframe(webp)?;

        if self.state == State::Initial {
            let dimensions = match self.dimensions {
                Some(dimensions) => dimensions,
                None => webp::vp8_dimensions(&keyframe.frame)
                    .ok_or(Error::BadWebp("cannot read keyframe dimensions"))?,
            };
            self.write_header(dimensions)?;
        }

        let alpha = if self.options.transparent {
            match alpha_webp {
                Some(bytes) => Some(webp::extract_keyframe(bytes)?.frame),
                None => None,
            }
        } else {
            None
        };

        // Cluster-relative: the sum of durations already buffered. Stays
        // under the 5000 ms rotation bound, so i16 never overflows.
        let timecode_ms = self.cluster_duration_ms.round() as i16;
        self.cluster_frames.push(PendingFrame {
            frame: keyframe.frame,
            alpha,
            timecode_ms,
        });
        self.cluster_duration_ms += duration;

        if self.cluster_duration_ms >= MAX_CLUSTER_DURATION_MS {
            self.flush_cluster()?;
        }
        Ok(())
    }

    /// Encode and append one RGBA frame through a host encoder
    ///
    /// When the muxer is `transparent`, the frame's alpha channel is
    /// synthesized into a grayscale plane and encoded as a second bitstream.
    pub fn add_image(
        &mut self,
        encoder: &mut dyn WebpEncoder,
        image: &RgbaImage,
        duration_override: Option<f64>,
    ) -> Result<()> {
        if self.state == State::Completed {
            return Err(Error::Completed);
        }

        if self.dimensions.is_none() {
            self.dimensions = Some(image.dimensions());
        }

        let webp = encoder.encode(image, self.options.clamped_quality())?;
        let alpha_webp = if self.options.transparent {
            let plane = alpha_plane(image, &mut self.alpha_scratch);
            Some(encoder.encode(plane, self.options.clamped_alpha_quality())?)
        } else {
            None
        };

        self.add_webp_frame(&webp, alpha_webp.as_deref(), duration_override)
    }

    /// Finalize the container
    ///
    /// Flushes any partial cluster, emits the Cues index, back-patches the
    /// SeekHead, Duration, and Segment size, and materializes the sink.
    /// Returns the assembled bytes in memory mode, `None` in target mode.
    pub fn complete(&mut self) -> Result<Option<Blob>> {
        if self.state == State::Completed {
            return Err(Error::Completed);
        }

        // A muxer that never saw a frame still produces a valid empty file
        if self.state == State::Initial {
            let dimensions = self.dimensions.unwrap_or((0, 0));
            self.write_header(dimensions)?;
        }

        self.flush_cluster()?;
        self.write_cues()?;
        self.patch_seek_head()?;
        self.patch_duration()?;
        self.patch_segment_size()?;

        self.state = State::Completed;
        debug!(
            "completed WebM stream: {} bytes, {:.0} ms",
            self.sink.length(),
            self.cluster_start_ms
        );
        self.sink.complete()
    }

    /// Emit the EBML header and the Segment skeleton
    ///
    /// Each top-level piece goes to the sink as its own write, so every
    /// completion-time patch later lands wholly inside one buffered chunk.
    fn write_header(&mut self, (width, height): (u32, u32)) -> Result<()> {
        debug!("writing WebM header for {}x{} video", width, height);

        let mut ebml_header = Element::master(
            ebml::EBML,
            vec![
                Element::uint(ebml::EBML_VERSION, 1),
                Element::uint(ebml::EBML_READ_VERSION, 1),
                Element::uint(ebml::EBML_MAX_ID_LENGTH, 4),
                Element::uint(ebml::EBML_MAX_SIZE_LENGTH, 8),
                Element::string(ebml::DOC_TYPE, "webm"),
                Element::uint(ebml::DOC_TYPE_VERSION, 2),
                Element::uint(ebml::DOC_TYPE_READ_VERSION, 2),
            ],
        );
        self.write_top_level(&mut ebml_header, 64)?;

        // The Segment runs to end of file; its size field is five reserved
        // bytes patched at completion
        let mut segment =
            Element::master(ebml::SEGMENT, Vec::new()).with_size(SizeHint::Reserved5);
        self.write_top_level(&mut segment, 16)?;
        let segment_offset = element_offset(&segment);
        let segment_data_offset = element_data_offset(&segment);

        let mut seek_head = Element::master(
            ebml::SEEK_HEAD,
            vec![
                seek_entry(ebml::CUES),
                seek_entry(ebml::INFO),
                seek_entry(ebml::TRACKS),
            ],
        );
        self.write_top_level(&mut seek_head, 128)?;

        let mut info = Element::master(
            ebml::INFO,
            vec![
                Element::uint(ebml::TIMECODE_SCALE, TIMECODE_SCALE_NS),
                Element::string(ebml::MUXING_APP, APP_NAME),
                Element::string(ebml::WRITING_APP, APP_NAME),
                Element::float64(ebml::DURATION, 0.0),
            ],
        );
        self.write_top_level(&mut info, 128)?;
        let duration_offset = element_data_offset(&info.children_mut()[3]);

        let mut video_children = vec![
            Element::uint(ebml::PIXEL_WIDTH, u64::from(width)),
            Element::uint(ebml::PIXEL_HEIGHT, u64::from(height)),
        ];
        if self.options.transparent {
            video_children.push(Element::uint(ebml::ALPHA_MODE, 1));
        }
        let mut tracks = Element::master(
            ebml::TRACKS,
            vec![Element::master(
                ebml::TRACK_ENTRY,
                vec![
                    Element::uint(ebml::TRACK_NUMBER, self.track_number),
                    Element::uint(ebml::TRACK_UID, self.track_number),
                    Element::uint(ebml::FLAG_LACING, 0),
                    Element::string(ebml::LANGUAGE, "und"),
                    Element::string(ebml::CODEC_ID, "V_VP8"),
                    Element::string(ebml::CODEC_NAME, "VP8"),
                    Element::uint(ebml::TRACK_TYPE, ebml::TRACK_TYPE_VIDEO),
                    Element::master(ebml::VIDEO, video_children),
                ],
            )],
        );
        self.write_top_level(&mut tracks, 128)?;

        // Info and Tracks positions are known immediately; Cues waits for
        // completion
        set_seek_position(
            &mut seek_head,
            SEEK_INDEX_INFO,
            element_offset(&info) - segment_data_offset,
        );
        set_seek_position(
            &mut seek_head,
            SEEK_INDEX_TRACKS,
            element_offset(&tracks) - segment_data_offset,
        );

        self.handles = Some(SegmentHandles {
            segment_offset,
            segment_data_offset,
            seek_head,
            duration_offset,
        });
        self.state = State::Writing;
        Ok(())
    }

    /// Serialize the buffered frames as one Cluster and record its cue point
    fn flush_cluster(&mut self) -> Result<()> {
        if self.cluster_frames.is_empty() {
            return Ok(());
        }
        let Some(handles) = &self.handles else {
            return Ok(());
        };

        let cluster_timecode = self.cluster_start_ms.round() as u64;
        let payload_bytes: usize = self
            .cluster_frames
            .iter()
            .map(|f| f.frame.len() + f.alpha.as_ref().map_or(0, Vec::len))
            .sum();
        let capacity =
            payload_bytes + self.cluster_frames.len() * BLOCK_HEADER_ESTIMATE + 16;

        let mut children = Vec::with_capacity(self.cluster_frames.len() + 1);
        children.push(Element::uint(ebml::TIMECODE, cluster_timecode));
        for frame in self.cluster_frames.drain(..) {
            children.push(block_container(frame, self.track_number)?);
        }
        let frame_count = children.len() - 1;

        let cluster_offset = self.sink.pos();
        let mut cluster = Element::master(ebml::CLUSTER, children);
        let mut stream = ByteStream::with_capacity(capacity);
        write_element(&mut stream, cluster_offset, &mut cluster);
        self.sink.write(stream.as_bytes())?;

        self.cues.push(CuePoint {
            time_ms: cluster_timecode,
            cluster_position: cluster_offset - handles.segment_data_offset,
        });
        debug!(
            "flushed cluster at {} ms: {} frames, {} bytes",
            cluster_timecode,
            frame_count,
            stream.len()
        );

        self.cluster_start_ms += self.cluster_duration_ms;
        self.cluster_duration_ms = 0.0;
        Ok(())
    }

    /// Emit the Cues index and point the SeekHead placeholder at it
    fn write_cues(&mut self) -> Result<()> {
        let track_number = self.track_number;
        let children = self
            .cues
            .drain(..)
            .map(|cue| {
                Element::master(
                    ebml::CUE_POINT,
                    vec![
                        Element::uint(ebml::CUE_TIME, cue.time_ms),
                        Element::master(
                            ebml::CUE_TRACK_POSITIONS,
                            vec![
                                Element::uint(ebml::CUE_TRACK, track_number),
                                Element::uint(
                                    ebml::CUE_CLUSTER_POSITION,
                                    cue.cluster_position,
                                ),
                            ],
                        ),
                    ],
                )
            })
            .collect::<Vec<_>>();

        let capacity = children.len() * 48 + 16;
        let mut cues = Element::master(ebml::CUES, children);
        self.write_top_level(&mut cues, capacity)?;

        if let Some(handles) = &mut self.handles {
            let position = element_offset(&cues) - handles.segment_data_offset;
            set_seek_position(&mut handles.seek_head, SEEK_INDEX_CUES, position);
        }
        Ok(())
    }

    /// Rewrite the SeekHead children in place, placeholders now resolved
    ///
    /// The id and outer size are untouched; every child re-serializes to the
    /// same width it was reserved at, so the rewrite is an exact overlay.
    fn patch_seek_head(&mut self) -> Result<()> {
        let Some(handles) = &mut self.handles else {
            return Ok(());
        };

        let end = self.sink.length();
        let data_offset = element_data_offset(&handles.seek_head);
        let mut stream = ByteStream::with_capacity(128);
        write_children(&mut stream, data_offset, handles.seek_head.children_mut());
        self.sink.seek(data_offset)?;
        self.sink.write(stream.as_bytes())?;
        self.sink.seek(end)
    }

    /// Overwrite the Duration placeholder with the total played milliseconds
    fn patch_duration(&mut self) -> Result<()> {
        let Some(handles) = &self.handles else {
            return Ok(());
        };

        let end = self.sink.length();
        let mut stream = ByteStream::with_capacity(8);
        stream.write_double_be(self.cluster_start_ms);
        self.sink.seek(handles.duration_offset)?;
        self.sink.write(stream.as_bytes())?;
        self.sink.seek(end)
    }

    /// Rewrite the Segment id plus its five reserved size bytes
    fn patch_segment_size(&mut self) -> Result<()> {
        let Some(handles) = &self.handles else {
            return Ok(());
        };

        let end = self.sink.length();
        let size = end - handles.segment_data_offset;
        let mut stream = ByteStream::with_capacity(16);
        let id = u64::from(ebml::SEGMENT);
        stream.write_unsigned_int_be(id, measure_unsigned_int(id));
        stream.write_ebml_var_int_width(size, 5);
        self.sink.seek(handles.segment_offset)?;
        self.sink.write(stream.as_bytes())?;
        self.sink.seek(end)
    }

    /// Serialize one element into a fresh scratch buffer and hand it to the
    /// sink as a single write
    fn write_top_level(&mut self, element: &mut Element, capacity: usize) -> Result<()> {
        let mut stream = ByteStream::with_capacity(capacity);
        write_element(&mut stream, self.sink.pos(), element);
        self.sink.write(stream.as_bytes())
    }
}

/// A Seek entry with a five-byte position placeholder
fn seek_entry(target_id: u32) -> Element {
    let id = u64::from(target_id);
    let mut id_bytes = Vec::with_capacity(4);
    for i in (0..measure_unsigned_int(id)).rev() {
        id_bytes.push((id >> (8 * i)) as u8);
    }
    Element::master(
        ebml::SEEK,
        vec![
            Element::bytes(ebml::SEEK_ID, id_bytes),
            Element::uint_with_width(ebml::SEEK_POSITION, 0, 5),
        ],
    )
}

/// Resolve the position placeholder of the `index`-th Seek entry
fn set_seek_position(seek_head: &mut Element, index: usize, position: u64) {
    seek_head.children_mut()[index].children_mut()[1].set_uint(position);
}

/// Build the block container for one frame
///
/// Opaque frames become a SimpleBlock with the keyframe flag; frames with an
/// alpha bitstream become a BlockGroup whose BlockAdditions carries the alpha
/// VP8 bytes.
fn block_container(frame: PendingFrame, track_number: u64) -> Result<Element> {
    let header = block_header(track_number, frame.timecode_ms)?;

    match frame.alpha {
        None => {
            let mut payload = Vec::with_capacity(4 + frame.frame.len());
            payload.extend_from_slice(&header);
            payload.push(SIMPLE_BLOCK_KEYFRAME_FLAGS);
            payload.extend_from_slice(&frame.frame);
            Ok(Element::bytes(ebml::SIMPLE_BLOCK, payload))
        }
        Some(alpha) => {
            let mut payload = Vec::with_capacity(4 + frame.frame.len());
            payload.extend_from_slice(&header);
            payload.push(0x00);
            payload.extend_from_slice(&frame.frame);

            Ok(Element::master(
                ebml::BLOCK_GROUP,
                vec![
                    Element::bytes(ebml::BLOCK, payload),
                    Element::master(
                        ebml::BLOCK_ADDITIONS,
                        vec![Element::master(
                            ebml::BLOCK_MORE,
                            vec![
                                Element::uint(ebml::BLOCK_ADD_ID, 1),
                                Element::bytes(ebml::BLOCK_ADDITIONAL, alpha),
                            ],
                        )],
                    ),
                ],
            ))
        }
    }
}

/// Common block header: track varint, signed 16-bit relative timecode
fn block_header(track_number: u64, timecode_ms: i16) -> Result<[u8; 3]> {
    // One-byte track varints cover exactly the Matroska track range
    if !(1..=126).contains(&track_number) {
        return Err(Error::BadTrackNumber(track_number));
    }
    let timecode = (timecode_ms as u16).to_be_bytes();
    Ok([0x80 | track_number as u8, timecode[0], timecode[1]])
}

/// Accessor for offsets the serializer is guaranteed to have populated
fn element_offset(element: &Element) -> u64 {
    element.offset.expect("element has been serialized")
}

fn element_data_offset(element: &Element) -> u64 {
    element.data_offset.expect("element has been serialized")
}
