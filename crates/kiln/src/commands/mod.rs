pub mod build;
pub mod init;
pub mod serve;
pub mod tasks;
pub mod watch;
