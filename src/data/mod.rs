//! Signal processing for a single cell.
pub mod fft;
pub mod processor;
pub mod projector;
pub mod reference;
pub mod ring_buffer;
