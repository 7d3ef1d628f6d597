mod node;
mod asset;
mod system_user;
mod permission;
mod subject;

pub use node::*;
pub use asset::*;
pub use system_user::*;
pub use permission::*;
pub use subject::*;
