pub mod media;
pub mod runs;
