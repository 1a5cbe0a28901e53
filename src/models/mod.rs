pub mod access_key;
pub mod enums;
pub mod note;
pub mod trip;

pub use access_key::*;
pub use enums::*;
pub use note::*;
pub use trip::*;
