mod histogram;
mod permutation;
mod table;

pub use histogram::{histogram, histogram_full};
pub use permutation::Permutation;
pub use table::{read_records, RecordTable};
