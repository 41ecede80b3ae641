//! Identity models

pub mod user;

pub use user::{LoginCredentials, NewUser, Registration, User, UserSummary};
