pub mod config;
pub mod csv_loader;
pub mod dispatcher;
pub mod feature_extractor;
pub mod gesture_buffer;
pub mod gesture_classifier;
pub mod hid;
pub mod mode_arbiter;
pub mod mouse_filter;
pub mod pipeline;
pub mod pose_source;
pub mod types;
