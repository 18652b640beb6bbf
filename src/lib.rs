//! A pure-Rust codec for the ASTC block-compressed texture format.
//!
//! The codec decompresses and compresses 2D and 3D images stored as a
//! sequence of self-contained 128-bit blocks. Decoding is bit-exact
//! against the format specification; encoding searches block modes,
//! partitionings, endpoint formats and quantization levels for the output
//! minimizing a weighted error metric, under a quality/speed tuning
//! resolved from a `[0, 100]` quality value.
//!
//! The entry point is [`Context`]: build a validated [`Config`], wrap it
//! in a context, then call [`Context::compress_image`] or
//! [`Context::decompress_image`]. The context owns all precomputed
//! tables and may be driven from several caller-provided worker threads
//! with progress reporting and cooperative cancellation.

mod bits;
mod blockmode;
mod blocksize;
mod config;
mod context;
mod decimation;
mod encode;
mod encode_hdr;
mod endpoint;
mod error;
mod header;
mod image;
mod ise;
mod paint;
mod partition;
mod quant;
mod symbolic;
mod util;

pub use config::{
  Config, Flags, Profile, Selector, Swizzle, Tuning, LEGAL_BLOCK_SIZES_2D,
  LEGAL_BLOCK_SIZES_3D,
};
pub use context::{Context, SharedBlocks};
pub use error::{Error, SUCCESS_NAME};
pub use header::{AstcHeader, BYTES_PER_BLOCK, HEADER_LEN, MAGIC};
pub use image::{ImageData, ImageDataMut, ImageView, ImageViewMut};
