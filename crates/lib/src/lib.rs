//! hover-lib: deployment engine for serverless application stages
//!
//! A stage manifest is compiled into a declarative resource graph, the remote
//! stack is reconciled against it, and the new build is released by publishing
//! function versions, running deploy hooks and moving live aliases:
//! - `manifest`: stage manifests and their validation
//! - `compile`: manifest to resource graph
//! - `reconcile`: converge the remote stack and collect its resources
//! - `release`: publish, warm, run hooks, cut over
//! - `retention`: sweep expired build artifacts and assets
//! - `stage`: the operations above composed per stage

pub mod assets;
pub mod client;
pub mod compile;
pub mod consts;
pub mod manifest;
pub mod naming;
pub mod paths;
pub mod reconcile;
pub mod release;
pub mod retention;
pub mod settings;
pub mod stage;
pub mod template;
pub mod util;
