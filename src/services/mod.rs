pub mod fare;
pub mod matching;
pub mod notifier;
pub mod rides;
pub mod store;
