pub mod check;
pub mod daemon;
pub mod init;
pub mod version;

pub use check::Check;
pub use daemon::Daemon;
pub use init::Init;
pub use version::Version;
