pub mod acquire;
pub mod engine;
pub mod enumerate;
pub mod events;
pub mod state;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod watcher;
