pub mod catalog;
pub mod config;
pub mod step;
pub mod tree;
pub mod workflow;

pub use catalog::*;
pub use config::*;
pub use step::*;
pub use tree::*;
pub use workflow::*;
