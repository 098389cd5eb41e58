mod device;
mod document;
mod envelope;
mod result;

pub use device::*;
pub use document::*;
pub use envelope::*;
pub use result::*;
