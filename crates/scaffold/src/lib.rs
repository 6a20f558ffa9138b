#![deny(unused)]
//! Project scaffolding for Code Play.
//!
//! Turns a template id into an in-memory file tree by instantiating the
//! template in a temporary workspace, and creates projects on top of that with
//! a compensating rollback of the project record.

pub mod catalog;
pub mod instantiate;
pub mod service;
pub mod tree;

pub use catalog::TemplateCatalog;
pub use instantiate::{Instantiator, ViteInstantiator};
pub use service::{CreatedProject, ProjectCreator, Scaffolder, MAX_PROJECT_NAME_LEN};
pub use tree::{read_tree, EXCLUDED_NAMES};
