//! Time, side and duration primitives shared by every component.

pub mod duration;
pub mod sign;
pub mod timebase;
