pub mod count;
pub mod item_record;
pub mod mapping;
pub mod sync;

pub use count::*;
pub use item_record::*;
pub use mapping::*;
pub use sync::*;
