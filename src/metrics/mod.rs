pub mod reader;
pub mod resample;
