pub mod access;
pub mod content;
pub mod sweeper;

pub use access::AccessGate;
pub use content::ContentService;
pub use sweeper::ExpirySweeper;
