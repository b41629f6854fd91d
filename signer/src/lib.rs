//! signbox signer - drives interactive signing tools through a pseudo-terminal
//!
//! A request flows through [`facade::Signer`]: it resolves an
//! [`profile::ActionProfile`], allocates a [`workspace::Workspace`], renders
//! the action's command chain, runs it with [`executor::ChainExecutor`] (one
//! [`driver::ProcessDriver`] call per step) and always cleans the workspace
//! before returning.

pub mod chain;
pub mod credential;
pub mod driver;
pub mod error;
pub mod executor;
pub mod facade;
pub mod profile;
pub mod workspace;

pub use chain::{ChainTemplate, CommandChain, CommandStep, TemplateError};
pub use credential::Credential;
pub use driver::{DriverError, PromptAuth, ProcessDriver, StepOutcome};
pub use error::SignError;
pub use executor::{ChainError, ChainExecutor};
pub use facade::{Signer, SignerOptions};
pub use profile::{ActionProfile, ProfileResolver, ResolveError, StaticProfiles};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};
