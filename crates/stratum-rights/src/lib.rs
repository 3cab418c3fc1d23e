//! # stratum-rights
//!
//! Grantees, roles and access rights for StratumDB.
//!
//! A [`grantee::Grantee`] is a user or a role: a direct-rights map (one
//! right per grantor per object), an ordered set of direct roles, and a
//! derived full-rights map recomputed to a fixed point whenever any
//! constituent changes. The PUBLIC role is merged into every ordinary
//! grantee's effective rights; the `_SYSTEM` authorization and the `DBA`
//! role exist from bootstrap.
//!
//! Rights errors are raised before any state mutation: a failed grant or
//! revoke leaves every rights map untouched.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod grantee;
pub mod manager;
pub mod right;

pub use grantee::Grantee;
pub use manager::{GranteeManager, DBA_ROLE, PUBLIC_ROLE, SYSTEM_AUTHORIZATION};
pub use right::{Privileges, Right};
