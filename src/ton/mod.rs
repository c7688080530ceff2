// TON primitives: cells, bag-of-cells and addresses
pub mod address;
pub mod boc;
pub mod cell;

pub use address::{Address, AddressError};
pub use cell::{Cell, CellBuilder, CellError, CellSlice};
