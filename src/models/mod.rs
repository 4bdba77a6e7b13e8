mod identity;
mod movie;
mod permissions;
pub mod token;
mod user;

pub use identity::{AuthenticatedUser, Identity, IdentityExt};
pub use movie::{Movie, MovieUpdate, NewMovie, Runtime};
pub use permissions::{MOVIES_READ, MOVIES_WRITE, Permissions};
pub use token::{Scope, Token};
pub use user::{NewUser, Password, RegisterUserRequest, User};
