pub mod catalog;
pub mod errors;
pub mod features;
pub mod prompts;
pub mod providers;
pub mod request;
pub mod result;
