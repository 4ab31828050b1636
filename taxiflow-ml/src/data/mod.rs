//! Trip data: monthly windows, parquet decoding, sources, and filtering.

pub mod decode;
pub mod source;
pub mod trips;
pub mod window;

pub use source::{HttpParquetSource, LocalParquetSource, StaticSource, TripSource};
pub use trips::{MAX_DURATION_MINUTES, MIN_DURATION_MINUTES, TripRecord, TripTable};
pub use window::TripWindow;
