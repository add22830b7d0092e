//! # Domain
//!
//! In-memory model a reconcile pass works on.
//!
//! - `aggregate.rs` - hydrated views of a primary resource and everything it depends on
//! - `ownership.rs` - which kinds of rendered objects an aggregate may own
//! - `template.rs` - the procedure template an aggregate renders
//! - `vars.rs` - composition of the template variable document

mod aggregate;
mod ownership;
mod template;
mod vars;

pub use aggregate::{
    Renderable, RenderTarget, RequestedBackupActionAggregate, ScheduledBackupAggregate,
};
pub use ownership::{config_map_gvk, cron_job_gvk, job_gvk, secret_gvk, ResourceTypes};
pub use template::Template;
pub use vars::{expand_dotted_path, merge_vars, VarsError};
