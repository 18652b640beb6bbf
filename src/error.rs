use thiserror::Error;

/// Typed error codes for every public entry point.
///
/// Validation is synchronous and allocation-free; per-block decode problems
/// never surface here (they paint the magenta error color instead).
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Error {
  #[error("out of memory, or a buffer was too small")]
  OutOfMem,
  #[error("bad parameter")]
  BadParam,
  #[error("unsupported block size")]
  BadBlockSize,
  #[error("unsupported color profile")]
  BadProfile,
  #[error("quality outside [0, 100]")]
  BadQuality,
  #[error("unsupported swizzle")]
  BadSwizzle,
  #[error("contradictory or unknown flags")]
  BadFlags,
  #[error("codec context used out of protocol")]
  BadContext,
  #[error("not implemented")]
  NotImplemented,
  #[error("decode mode incompatible with the color profile")]
  BadDecodeMode,
}

/// String name reported for a successful call, for parity with the
/// reference encoder's error-string API.
pub const SUCCESS_NAME: &str = "ASTCENC_SUCCESS";

impl Error {
  /// Reference-compatible code name.
  pub fn name(self) -> &'static str {
    match self {
      Error::OutOfMem => "ASTCENC_ERR_OUT_OF_MEM",
      Error::BadParam => "ASTCENC_ERR_BAD_PARAM",
      Error::BadBlockSize => "ASTCENC_ERR_BAD_BLOCK_SIZE",
      Error::BadProfile => "ASTCENC_ERR_BAD_PROFILE",
      Error::BadQuality => "ASTCENC_ERR_BAD_QUALITY",
      Error::BadSwizzle => "ASTCENC_ERR_BAD_SWIZZLE",
      Error::BadFlags => "ASTCENC_ERR_BAD_FLAGS",
      Error::BadContext => "ASTCENC_ERR_BAD_CONTEXT",
      Error::NotImplemented => "ASTCENC_ERR_NOT_IMPLEMENTED",
      Error::BadDecodeMode => "ASTCENC_ERR_BAD_DECODE_MODE",
    }
  }
}
