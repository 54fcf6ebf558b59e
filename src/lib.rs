pub mod compactor;
pub mod engine;
pub mod facility;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod seed;
pub mod wal;
pub mod wire;
