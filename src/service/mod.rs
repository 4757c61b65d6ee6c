//! # Service Layer
//!
//! Application services built on the protocol server.
//!
//! ## Components
//! - **Agent**: agent authentication, the HWID directory, and font
//!   install/uninstall commands

pub mod agent;

pub use agent::{
    AcceptAll, AgentDirectory, AgentRecord, AgentServer, AgentSummary, Authenticator, FontSpec,
    HwidAllowList,
};
