//! Domain model module declarations.

pub mod record;

pub use record::ControlPointRecord;
