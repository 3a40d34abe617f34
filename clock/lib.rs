#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod batch;
pub mod coefficients;
pub mod config;
pub mod engine;
pub mod example;
pub mod handler;
pub mod server;
pub mod types;
pub mod validate;

pub use coefficients::{CoefficientProvider, CoefficientSource, CoefficientTable};
pub use engine::estimate_age;
pub use handler::handle_estimate_request;
pub use types::{AgeEstimate, MethylationVector, NUM_CPG_SITES};
