pub mod command;
pub mod expr;
pub mod fastx;
pub mod file;
pub mod mail;
pub mod options;
pub mod record;
pub mod serializer;
pub mod status;
pub mod streams;
pub mod system;
