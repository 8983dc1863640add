pub mod backends;
pub mod fixtures;

#[allow(unused_imports)]
pub use backends::{TestBackend, local_backends};
#[allow(unused_imports)]
pub use fixtures::{chunked_stream, seeded_bytes};
