pub(crate) mod chart;
pub(crate) mod demographics;
pub(crate) mod location;
