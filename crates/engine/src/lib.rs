//! Approval workflow engine for line-based document sign-off.
//!
//! Line templates describe who approves a document type and in what
//! order; the engine instantiates them into running approval
//! instances, drives the step-by-step state machine, and answers
//! inbox and overdue queries. Persistence and role resolution are
//! injected, so the engine embeds into a larger application without
//! owning its storage or its user directory.

pub mod admin;
pub mod config;
pub mod directory;
pub mod engine;
pub mod factory;
pub mod queries;
pub mod transitions;

pub use admin::{NewDelegation, NewTemplate, NewTemplateStep};
pub use config::{
    ConfigError, ConfigOverrides, DatabaseConfig, EngineConfig, LoadOptions, LogFormat,
    LoggingConfig,
};
pub use directory::{InMemoryRoleDirectory, RoleDirectory};
pub use engine::ApprovalEngine;
pub use factory::CreateInstanceRequest;
pub use queries::{OverdueStep, PendingApproval};
