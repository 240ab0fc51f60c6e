//! Crop a photographed problem to the region the user dragged over, in native
//! pixels, and hand the encoded crop to a vision model solver.

pub mod config;
pub mod convert;
pub mod error;
pub mod geometry;
pub mod gesture;
pub mod overlay;
pub mod selector;
pub mod session;
pub mod solve;
pub mod source;
pub mod store;
pub mod util;

pub use convert::{
    compute_scale, crop_and_encode, encode, map_to_native, rasterize, CpuSurface, CropOptions,
    CropOutput, EncodeFormat, EncodedImage, RasterSurface, ScaleMode,
};
pub use error::{CropError, SolveError, StoreError};
pub use geometry::{NativeRect, Point, Scale, SelectionRect, Size};
pub use gesture::{GestureEvent, PointerEvent, PointerKind};
pub use selector::{GestureState, RegionSelector, SelectorConfig, MIN_SELECTION_SIDE};
pub use session::{ConfirmControl, CropJob, CropSession};
pub use solve::{CommandSolver, Solution, SolveRequest, Solver};
pub use source::SourceImage;
