pub mod init;
pub mod notifier;
pub mod workers;

#[cfg(test)]
pub mod test_support;
