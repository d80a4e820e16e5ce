use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FromPrimitive};

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed throughout the engine.
/// Only primitive float types implement this; evaluation is over IEEE-754
/// scalars, never over wrapper types.
pub trait Float:
    NumFloat + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
