mod desk;
mod fixtures;
mod flaky;
mod office;

pub use desk::TestDesk;
pub use fixtures::{compute_row, fields, model_row, sample_catalog};
pub use flaky::FlakyBackend;
pub use office::TestOffice;
