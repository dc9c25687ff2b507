pub mod mask;
pub mod padding;

pub use mask::{cut_out, quantize};
pub use padding::{fit_within, pad_to_square, Position};
