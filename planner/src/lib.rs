pub mod classfile;
pub mod editor;
pub mod error;
pub mod keys;
pub mod names;
pub mod pack;
pub mod planner;
pub mod record;
pub mod repository;
pub mod roots;
pub mod source;
pub mod telemetry;

pub use crate::error::PlanError;
pub use crate::keys::{ClassId, LoaderId};

pub type Symbol = lasso::Spur;

/// A single method to be probed regardless of reachability, e.g. a user-placed
/// code-region marker. Names are slash-form internal names.
#[derive(Debug, Clone)]
pub struct ProfilePoint {
    pub class_name: String,
    pub method_name: String,
    pub method_signature: String,
}

/// Session-wide planner settings, built once by the agent shell.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Auto-root `run()V` on `java/lang/Runnable` implementors even when
    /// explicit roots exist.
    pub instrument_spawned_threads: bool,
    /// Leave single-`return` bodies uninstrumented.
    pub dont_instrument_empty: bool,
    /// Leave trivial getter/setter bodies uninstrumented.
    pub dont_scan_getter_setter: bool,
    /// Skip `<init>` on classes with class-file major > 50.
    pub skip_constructors: bool,
    pub profile_points: Vec<ProfilePoint>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            instrument_spawned_threads: false,
            dont_instrument_empty: true,
            dont_scan_getter_setter: true,
            skip_constructors: false,
            profile_points: Vec::new(),
        }
    }
}
