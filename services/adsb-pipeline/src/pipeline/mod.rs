//! Live decode-and-display stages fed by the acquisition worker

pub mod decode;
pub mod display;

pub use display::{Display, DisplayFormat};
