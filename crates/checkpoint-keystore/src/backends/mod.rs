//! Key material backends for different key reference schemes

pub mod file;
pub mod hsm;
pub mod memory;

pub use file::FileBackend;
pub use hsm::{HsmBackend, SoftHsmSigner};
pub use memory::MemoryBackend;
