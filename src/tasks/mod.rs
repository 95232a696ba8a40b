//! Tasks: model, owner-scoped service, and REST routes.

pub mod model;
pub mod routes;
pub mod service;

pub use model::{NewTask, Priority, Task, TaskUpdate};
pub use service::TaskService;
