//! Statement-tree model for seam.
//!
//! This crate provides the data model consumed by the matching engine:
//! - Fragment arena: leaves, composites, and sub-expression fragments
//! - Source locations with containment predicates
//! - Leaf constructs: invocations, variable declarations, literals, comments
//! - Containers: the method/lambda/initializer whose body is compared
//! - A programmatic body builder used by model providers and tests
//!
//! The model is immutable once built. The matching engine never mutates
//! fragments; session-local state (argument substitutions, mapped sets)
//! lives on the session, not here.

pub mod builder;
pub mod constructs;
pub mod container;
pub mod fragment;
pub mod location;

pub use builder::BodyBuilder;
pub use constructs::{ChainStage, Comment, Invocation, Lambda, VariableDeclaration};
pub use container::{Container, Parameter};
pub use fragment::{BodyArena, CompositeKind, ExpressionRole, Fragment, FragmentId, FragmentKind, LeafKind};
pub use location::Location;
