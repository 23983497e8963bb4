//! Multi-representation picture containers.
//!
//! A [`PictureContainer`] holds several encodings of one image (say a PNG
//! and a legacy PICT) and persists them in a versioned binary container.
//! Codecs are resolved through a [`CodecRegistry`] by identifier or by
//! signature sniffing; unknown formats are carried losslessly.

pub mod error;
pub mod provider;
pub mod representation;
pub mod codec;
pub mod dedup;
pub mod settings;
pub mod format;
pub mod picture;

pub use error::{Error, Result};
pub use provider::{ByteView, DataProvider, DirectAccess, FileProvider, MemoryProvider, SliceProvider, StreamProvider};
pub use representation::{ImageInfo, Representation, RepresentationKind};
pub use codec::{BestPolicy, Codec, CodecDescriptor, CodecFlags, CodecRegistry, Purpose, Signature};
pub use dedup::{Admission, DedupAccumulator};
pub use settings::{DrawingSettings, TransferMode, Tiling, Transform};
pub use format::{inspect, read_container, write_container, Endian, Layout, PictureParts, ReadOptions, WriteOptions};
pub use picture::PictureContainer;
