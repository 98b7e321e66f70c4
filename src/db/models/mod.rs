pub mod notification;

pub use self::notification::*;
