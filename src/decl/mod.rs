pub mod file;
pub mod load;
pub mod template;
pub mod validate;
