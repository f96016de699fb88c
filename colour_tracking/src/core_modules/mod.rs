pub mod blob_detector;
pub mod colour_tracker;
pub mod frame_buffer;
pub mod hsv_range;
pub mod mask;
pub mod moment;
pub mod pixel;
