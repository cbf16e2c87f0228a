//! Helpers shared by unit tests. The integration tests include these files
//! through `tests/support`.

mod gzip;
pub mod socket_guard;

pub use gzip::gzip_stored;
