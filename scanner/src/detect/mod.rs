pub mod decoder;
mod font;
pub mod overlay;
pub mod qr;
pub mod traits;

pub use decoder::{DecodedFrame, FrameDecoder, Verdict};
pub use qr::RqrrDetector;
pub use traits::{CodeDetector, Corner, Detection};
