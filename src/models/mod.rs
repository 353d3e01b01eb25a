//! Typed value objects stored inside entity columns.

pub mod attributes;
pub mod line_data;

pub use attributes::AttributeMap;
pub use line_data::LineData;
