//! Wire types exchanged with the portal API.
//!
//! Only the fields the session layer and the CLI read are typed; everything
//! else is carried through as raw JSON so nothing the server sends is lost.

pub mod application;
pub mod profile;

pub use application::{ApplicationEnums, ApplicationSubmission, RsvpRequest};
pub use profile::{UserProfile, UserStatus};
