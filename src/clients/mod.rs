pub mod series;

pub use series::{HttpSeriesDetector, NextBook, SeriesDetector, SeriesDetectorConfig, SeriesInfo};
