//! Core scanning primitives: preprocessing filters, the symbology model,
//! and the wrapper around the external barcode reader.
//!
//! The crate is deliberately free of capture and HTTP concerns so the
//! decode path can be exercised with plain byte buffers in tests.

pub mod decode;
pub mod preprocess;
pub mod symbology;

pub use decode::{Decoder, Detection};
pub use preprocess::{PreprocessConfig, PreprocessError, Preprocessor, Variant, bgr_to_luma};
pub use symbology::Symbology;
