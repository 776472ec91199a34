//! Scene-side inputs of the recorder
//!
//! The draw list is produced upstream by the visibility stage; geometry
//! bindings and the matrix layout come from the scene storage layer.

mod draw_list;
mod geometry;

pub use draw_list::*;
pub use geometry::*;
