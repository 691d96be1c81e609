pub mod email;
pub mod in_app;
pub mod push;
pub mod sms;

pub use email::{EmailHandler, EmailHandlerConfig};
pub use in_app::InAppHandler;
pub use push::{PushHandler, PushProviderConfig};
pub use sms::{SmsHandler, SmsProviderConfig};
