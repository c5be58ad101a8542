// Modules
pub mod config;
pub mod consts;
pub mod evolution;
pub mod portfolio;
pub mod processor;
pub mod queue;
pub mod result_store;
pub mod simulator;
pub mod task;

pub use evolution::algorithms::{Algorithm, AlgorithmRegistry, OptimiserId};
pub use evolution::cache::EvaluationCache;
pub use evolution::objective::{Bounds, Constraints, Objective, OptimizationDirection};
pub use evolution::result::OptimisationResult;
pub use portfolio::{PortfolioSolution, Scenario, Site, SiteSolution};
pub use processor::TaskProcessor;
pub use queue::{TaskState, WorkQueue};
pub use task::Task;
