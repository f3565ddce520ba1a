pub mod stretch;

pub use stretch::Stretcher;
