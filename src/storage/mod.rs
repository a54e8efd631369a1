mod memory;
mod postgres;
mod rocksdb;
mod sequence;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use rocksdb::RocksDbStore;
pub use sequence::AtomicCounter;
