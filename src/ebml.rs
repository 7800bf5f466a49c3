//! EBML element tree model and serializer
//!
//! Elements are built declaratively, then handed to [`write_element`] which
//! emits `id | size | payload`, records the absolute offset of every element
//! and of its payload, and back-patches master-element sizes once the
//! children are written.

use crate::stream::{measure_unsigned_int, ByteStream};

// EBML header elements (IDs include the VINT marker bits)

/// EBML (root of the EBML header).
pub const EBML: u32 = 0x1A45DFA3;
/// EBML Version.
pub const EBML_VERSION: u32 = 0x4286;
/// EBML Read Version.
pub const EBML_READ_VERSION: u32 = 0x42F7;
/// Maximum ID Length.
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
/// Maximum Size Length.
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// Document Type.
pub const DOC_TYPE: u32 = 0x4282;
/// Document Type Version.
pub const DOC_TYPE_VERSION: u32 = 0x4287;
/// Document Type Read Version.
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// Segment elements

/// Segment (main container).
pub const SEGMENT: u32 = 0x18538067;
/// SeekHead (index for faster seeking).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek (single entry in SeekHead).
pub const SEEK: u32 = 0x4DBB;
/// SeekID (element ID being indexed).
pub const SEEK_ID: u32 = 0x53AB;
/// SeekPosition (byte position relative to the segment payload).
pub const SEEK_POSITION: u32 = 0x53AC;

// Segment information

/// Info (segment information).
pub const INFO: u32 = 0x1549A966;
/// Timecode Scale (nanoseconds per tick).
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Duration (in timecode units).
pub const DURATION: u32 = 0x4489;
/// Muxing Application.
pub const MUXING_APP: u32 = 0x4D80;
/// Writing Application.
pub const WRITING_APP: u32 = 0x5741;

// Track elements

/// Tracks container.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track Entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track Number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track UID.
pub const TRACK_UID: u32 = 0x73C5;
/// Flag Lacing.
pub const FLAG_LACING: u32 = 0x9C;
/// Language (ISO 639-2).
pub const LANGUAGE: u32 = 0x22B59C;
/// Codec ID.
pub const CODEC_ID: u32 = 0x86;
/// Codec Name.
pub const CODEC_NAME: u32 = 0x258688;
/// Track Type.
pub const TRACK_TYPE: u32 = 0x83;
/// Video settings container.
pub const VIDEO: u32 = 0xE0;
/// Pixel Width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel Height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Alpha Mode.
pub const ALPHA_MODE: u32 = 0x53C0;

// Cluster elements

/// Cluster (container for frames).
pub const CLUSTER: u32 = 0x1F43B675;
/// Timecode (cluster base timecode).
pub const TIMECODE: u32 = 0xE7;
/// Simple Block (compact block with flags).
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// Block Group.
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block Additions.
pub const BLOCK_ADDITIONS: u32 = 0x75A1;
/// Block More.
pub const BLOCK_MORE: u32 = 0xA6;
/// Block Add ID.
pub const BLOCK_ADD_ID: u32 = 0xEE;
/// Block Additional.
pub const BLOCK_ADDITIONAL: u32 = 0xA5;

// Cues elements

/// Cues (seeking index).
pub const CUES: u32 = 0x1C53BB6B;
/// Cue Point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue Time.
pub const CUE_TIME: u32 = 0xB3;
/// Cue Track Positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue Track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cue Cluster Position.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

/// Track type value for video tracks
pub const TRACK_TYPE_VIDEO: u64 = 1;

/// Element payload
#[derive(Debug, Clone)]
pub enum Payload {
    /// Child elements, written recursively
    Children(Vec<Element>),
    /// Raw bytes written verbatim after the size
    Bytes(Vec<u8>),
    /// UTF-8 string
    Str(String),
    /// Unsigned integer, big-endian at its natural or forced width
    UInt(u64),
    /// IEEE-754 single
    Float32(f32),
    /// IEEE-754 double
    Float64(f64),
}

/// How the size field of an element is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHint {
    /// Writer decides: scalars get their natural size; master elements get a
    /// reserved 4-byte varint that is patched once the children are written
    Auto,
    /// Force the payload to `width` bytes (unsigned integers only)
    Fixed(usize),
    /// Streaming marker: a single `0xFF` size byte, never patched
    Unknown,
    /// Five reserved all-ones varint bytes; patched later by the caller, not
    /// by the writer
    Reserved5,
}

/// One node of an EBML tree
///
/// `offset` and `data_offset` are absolute file positions populated during
/// serialization; callers use them to patch reserved fields afterwards.
#[derive(Debug, Clone)]
pub struct Element {
    pub id: u32,
    pub payload: Payload,
    pub size: SizeHint,
    pub offset: Option<u64>,
    pub data_offset: Option<u64>,
}

impl Element {
    fn new(id: u32, payload: Payload) -> Self {
        Self {
            id,
            payload,
            size: SizeHint::Auto,
            offset: None,
            data_offset: None,
        }
    }

    /// Master element holding child elements
    pub fn master(id: u32, children: Vec<Element>) -> Self {
        Self::new(id, Payload::Children(children))
    }

    /// Unsigned integer at its natural width
    pub fn uint(id: u32, value: u64) -> Self {
        Self::new(id, Payload::UInt(value))
    }

    /// Unsigned integer forced to `width` bytes (reserved for patching)
    pub fn uint_with_width(id: u32, value: u64, width: usize) -> Self {
        let mut element = Self::new(id, Payload::UInt(value));
        element.size = SizeHint::Fixed(width);
        element
    }

    pub fn string(id: u32, value: &str) -> Self {
        Self::new(id, Payload::Str(value.to_string()))
    }

    pub fn bytes(id: u32, value: Vec<u8>) -> Self {
        Self::new(id, Payload::Bytes(value))
    }

    pub fn float32(id: u32, value: f32) -> Self {
        Self::new(id, Payload::Float32(value))
    }

    pub fn float64(id: u32, value: f64) -> Self {
        Self::new(id, Payload::Float64(value))
    }

    /// Override the size policy
    pub fn with_size(mut self, size: SizeHint) -> Self {
        self.size = size;
        self
    }

    /// Child elements of a master element
    ///
    /// Panics if the payload is not `Children`; callers hold onto master
    /// elements specifically to revisit their children.
    pub fn children_mut(&mut self) -> &mut Vec<Element> {
        match &mut self.payload {
            Payload::Children(children) => children,
            _ => panic!("element {:#X} has no children", self.id),
        }
    }

    /// Payload value for integer placeholders that get patched later
    pub fn set_uint(&mut self, value: u64) {
        self.payload = Payload::UInt(value);
    }
}

/// Serialize sibling elements in order
///
/// `base_offset` is the absolute file position of byte 0 of `stream`.
pub fn write_children(stream: &mut ByteStream, base_offset: u64, nodes: &mut [Element]) {
    for node in nodes {
        write_element(stream, base_offset, node);
    }
}

/// Serialize one element, recording its offsets and patching its size
pub fn write_element(stream: &mut ByteStream, base_offset: u64, node: &mut Element) {
    node.offset = Some(base_offset + stream.pos() as u64);

    // IDs carry their own marker bits; emit as a minimal big-endian integer
    let id = u64::from(node.id);
    stream.write_unsigned_int_be(id, measure_unsigned_int(id));

    let size = node.size;
    let data_offset: u64;
    match &mut node.payload {
        Payload::Children(children) => match size {
            SizeHint::Unknown => {
                stream.write_byte(0xFF);
                data_offset = base_offset + stream.pos() as u64;
                write_children(stream, base_offset, children);
            }
            SizeHint::Reserved5 => {
                // All-ones 5-byte varint; the caller patches it once the
                // final payload size is known
                stream.write_ebml_var_int_width((1u64 << 35) - 1, 5);
                data_offset = base_offset + stream.pos() as u64;
                write_children(stream, base_offset, children);
            }
            _ => {
                let size_pos = stream.pos();
                stream.write_bytes(&[0, 0, 0, 0]);
                let data_begin = stream.pos();
                data_offset = base_offset + data_begin as u64;
                write_children(stream, base_offset, children);

                // A 4-byte varint caps any one master element near 256 MB
                let payload_size = (stream.pos() - data_begin) as u64;
                let end = stream.pos();
                stream.seek(size_pos);
                stream.write_ebml_var_int_width(payload_size, 4);
                stream.seek(end);
            }
        },
        Payload::Str(s) => {
            stream.write_ebml_var_int(s.len() as u64);
            data_offset = base_offset + stream.pos() as u64;
            stream.write_string(s);
        }
        Payload::UInt(value) => {
            let width = match size {
                SizeHint::Fixed(width) => width,
                _ => measure_unsigned_int(*value),
            };
            stream.write_ebml_var_int(width as u64);
            data_offset = base_offset + stream.pos() as u64;
            stream.write_unsigned_int_be(*value, width);
        }
        Payload::Float32(value) => {
            stream.write_ebml_var_int(4);
            data_offset = base_offset + stream.pos() as u64;
            stream.write_float_be(*value);
        }
        Payload::Float64(value) => {
            stream.write_ebml_var_int(8);
            data_offset = base_offset + stream.pos() as u64;
            stream.write_double_be(*value);
        }
        Payload::Bytes(bytes) => {
            stream.write_ebml_var_int(bytes.len() as u64);
            data_offset = base_offset + stream.pos() as u64;
            stream.write_bytes(bytes);
        }
    }
    node.data_offset = Some(data_offset);
}
