pub mod config;
pub mod feedback;
pub mod host;
pub mod media;
pub mod packet;

pub use config::*;
pub use feedback::*;
pub use host::*;
pub use media::*;
pub use packet::*;
