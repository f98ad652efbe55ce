mod acm;
mod capabilities;
mod file_id;
mod grantee;
mod object;
mod permission;

pub use acm::{Acm, AcmError, ProjectShare};
pub use capabilities::{Capabilities, CapabilityFlags};
pub use file_id::{FileId, FileIdError, FILE_ID_SIZE};
pub use grantee::{flatten, GranteeError, ResourceString, EVERYONE};
pub use object::{ChangeToken, Object, ObjectFlags, Revision};
pub use permission::Permission;
