//! # Backup Maker Controller
//!
//! Kubernetes controller for riotkit.org backup resources.
//!
//! A `ScheduledBackup` describes how an application is backed up: the procedure
//! template, the GPG key pair, the repository access token and the template
//! variables. The controller renders it through the backup-maker generator and
//! applies the resulting Secrets, ConfigMaps and CronJob. A
//! `RequestedBackupAction` triggers a single backup or restore Job from a schedule.
//!
//! ## Modules
//!
//! - `crd` - custom resource types
//! - `domain` - hydrated aggregates, ownership filtering and variable composition
//! - `factory` - aggregate hydration from the cluster
//! - `render` - the renderer seam and its backup-maker CLI implementation
//! - `apply` - create/update/recreate of rendered documents
//! - `health` - health of owned children
//! - `controller` - the reconcile functions of every control loop
//! - `locking`, `cluster`, `gpg`, `events` - collaborators behind traits
//! - `runtime`, `server`, `cli`, `config` - process plumbing

pub mod apply;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod events;
pub mod factory;
pub mod gpg;
pub mod health;
pub mod locking;
pub mod observability;
pub mod render;
pub mod runtime;
pub mod server;
