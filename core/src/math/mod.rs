pub mod grid;
pub mod normality;
pub mod savgol;
pub mod stats;

pub use normality::{shapiro_wilk, ShapiroWilk};
pub use savgol::SavitzkyGolay;
pub use stats::{LinearFit, StatsHelper};
