pub mod stub;

#[cfg(target_os = "linux")]
pub mod shared_library;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(target_os = "linux")]
pub use shared_library::SharedLibraryBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
