pub mod store_file;
#[cfg(test)]
pub mod store_mem;

pub use store_file::FileSettingsStore;
#[cfg(test)]
pub use store_mem::InMemorySettingsStore;
