mod archive;
mod channel;
mod history;
mod pending;
mod progress;
mod release;
mod version;

pub use archive::ArchiveType;
pub use channel::Channel;
pub use history::{InstallMethod, UpdateHistoryRecord};
pub use pending::PendingUpdate;
pub use progress::ProgressEvent;
pub use release::ReleaseInfo;
pub use version::{compare_versions, is_newer_version, parse_version};

#[cfg(test)]
mod tests;
