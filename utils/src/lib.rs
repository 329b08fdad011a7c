pub mod audio;
pub mod wav;

pub use wav::WavFileSource;
