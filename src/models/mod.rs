//! Domain models fed by consumers.

pub mod weather;

pub use weather::{SharedWeather, Weather};
