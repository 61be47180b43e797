//! Data models for budgetbook authentication.
//!
//! - `TokenPair`: access/refresh tokens, also the stored representation
//! - `UserProfile`: the authenticated user's profile
//! - `Credentials`, `Registration`: request bodies for login and sign-up

pub mod profile;
pub mod requests;
pub mod tokens;

pub use profile::UserProfile;
pub use requests::{Credentials, Registration};
pub(crate) use requests::RefreshRequest;
pub use tokens::TokenPair;
