pub mod arma;
pub mod ewma;
pub mod garch;
pub mod optimizer;
pub mod standardizer;

// Re-exports for convenience
pub use arma::{ArmaEngine, ArmaFit, CssArma, MeanForecast, MeanModel, ModelOrder};
pub use ewma::Ewma;
pub use garch::{Garch11, GarchEngine, GarchFit, VolatilityModel};
pub use optimizer::FitBudget;
pub use standardizer::Standardizer;
