//! Core data types for the CAOS collector

pub mod metric;
pub mod observation;
pub mod series;
pub mod window;
