//! Numerical core of a portfolio-construction engine: five stateless
//! components (Estimator, Risk Kernel, Screener, Optimizer, Drift Analyzer)
//! over a shared data model. No I/O, no CLI, no persistence format is owned
//! by this crate — collaborators materialize inputs and consume outputs.

pub mod drift;
pub mod error;
pub mod estimator;
pub mod linalg;
pub mod optimizer;
mod optimizer_qp;
pub mod risk;
pub mod screener;
pub mod types;

pub use drift::{check_drift, PricePanel};
pub use error::{CoreError, CoreResult};
pub use estimator::estimate;
pub use optimizer::optimize;
pub use screener::screen;